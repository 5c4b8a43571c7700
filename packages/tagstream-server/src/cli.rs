use clap::Parser;

/// tagstream server - remote access to taggers and measurements
#[derive(Parser)]
#[command(name = "tagstream-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Port to listen on (overrides TAGSTREAM_PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind address (overrides TAGSTREAM_BIND_ADDR)
    #[arg(long)]
    pub bind_addr: Option<String>,
}
