use std::process;

use clap::{Parser, Subcommand, ValueEnum};

use lbspeakerd_speaker::{config::Config, server};
use lbspeakerd_trace::init::TraceConfig;

use crate::speaker::SpeakerCmd;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cmd {
    #[arg(
        short,
        long,
        global = true,
        required = false,
        default_value = "info",
        help = "Log level(trace, debug, info, warn, error)"
    )]
    pub level: String,

    #[arg(
        value_enum,
        short = 'd',
        long,
        global = true,
        required = false,
        default_value = "plain",
        help = "Log display format"
    )]
    pub format: Format,

    #[arg(
        short = 'o',
        long = "log-file",
        global = true,
        help = "Log output file path"
    )]
    pub log_file: Option<String>,

    #[clap(subcommand)]
    pub sub: SubCmd,
}

#[derive(Debug, Clone, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Plain,
    Json,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Plain => write!(f, "plain"),
            Format::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum SubCmd {
    Speaker(SpeakerCmd),
    Version,
}

pub fn run() {
    let command = Cmd::parse();

    let trace_conf = TraceConfig {
        level: command.level,
        format: command.format.to_string(),
        file: command.log_file,
    };

    match command.sub {
        SubCmd::Version => println!("{}", env!("CARGO_PKG_VERSION")),
        SubCmd::Speaker(s) => {
            let mut conf = match Config::load(&s.file) {
                Ok(conf) => conf,
                Err(e) => {
                    eprintln!("failed to load {}: {}", s.file, e);
                    process::exit(1);
                }
            };
            if let Some(node_name) = s.node_name {
                conf.node_name = node_name;
            }
            if let Err(e) = server::start(conf, trace_conf) {
                eprintln!("speaker failed: {}", e);
                process::exit(1);
            }
        }
    }
}
