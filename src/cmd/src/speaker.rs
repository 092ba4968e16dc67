use clap::Parser;

#[derive(Debug, Clone, Parser)]
pub struct SpeakerCmd {
    #[arg(short = 'f', long, help = "Config file path for the speaker")]
    pub file: String,

    #[arg(
        long = "node-name",
        env = "NODE_NAME",
        help = "Name of the node this speaker runs on"
    )]
    pub node_name: Option<String>,
}
