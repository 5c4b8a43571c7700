pub const SUCCESS: i32 = 0;
pub const INPUT_ERROR: i32 = 1;
pub const EXECUTION_ERROR: i32 = 2;
pub const CONFIGURATION_IMPOSSIBLE: i32 = 3;
pub const TIMEOUT: i32 = 4;
