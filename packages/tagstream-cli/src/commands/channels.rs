use crate::cli::ChannelsArgs;
use crate::commands::exit_code_for;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use tagstream::{Channel, ChannelEdge, TimeTagger, VirtualTagger, VirtualTaggerConfig};

#[derive(Serialize)]
struct ChannelsOutput {
    serial: String,
    model: String,
    channels: Vec<Channel>,
}

pub fn execute(args: ChannelsArgs) -> i32 {
    let tagger = match VirtualTagger::new(VirtualTaggerConfig {
        n_channels: args.inputs,
        ..VirtualTaggerConfig::default()
    }) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_code_for(&e);
        }
    };

    let edge: ChannelEdge = args.edge.into();
    let info = ChannelsOutput {
        serial: tagger.serial(),
        model: tagger.model().to_string(),
        channels: tagger.get_channel_list(edge),
    };
    tagger.shutdown();

    if args.json {
        return output::emit(&info, false, None);
    }
    print!("{}", output::channel_table(&info.model, &info.serial, &info.channels));
    exit_codes::SUCCESS
}
