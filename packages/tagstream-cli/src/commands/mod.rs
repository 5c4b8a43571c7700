pub mod channels;
pub mod flim;
pub mod probe;

use crate::exit_codes;
use tagstream::TagStreamError;

/// Exit code reported for a library error
pub fn exit_code_for(err: &TagStreamError) -> i32 {
    match err {
        TagStreamError::ConfigurationImpossible(_) => exit_codes::CONFIGURATION_IMPOSSIBLE,
        TagStreamError::InvalidParameter(_)
        | TagStreamError::InvalidChannel(_)
        | TagStreamError::CsvError(_) => exit_codes::INPUT_ERROR,
        TagStreamError::Timeout(_) => exit_codes::TIMEOUT,
        _ => exit_codes::EXECUTION_ERROR,
    }
}
