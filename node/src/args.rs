use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a `node.toml` configuration file.
    #[arg(short, long, default_value = "configs/node.toml")]
    pub config: String,

    /// Overrides `NodeConfig::listen_address`.
    #[arg(short, long)]
    pub address: Option<String>,
}
