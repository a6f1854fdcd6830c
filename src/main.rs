use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

use xtftp::config::{AppConfig, TransferKind};
use xtftp::tftp::client::{self, ClientConfig};
use xtftp::tftp::core::TransferMode;
use xtftp::tftp::server::{self, Config};

#[derive(Parser)]
#[command(
    name = "xtftp",
    about = "Asynchronous TFTP server and client",
    disable_version_flag = true
)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    verbose: bool,

    /// Read defaults from a TOML config file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the version and exit
    #[arg(short = 'v', long = "version")]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve files from a directory
    Server {
        /// Address to listen on [default: 0.0.0.0]
        #[arg(short = 'H', long)]
        host: Option<IpAddr>,

        /// Port to listen on; ports below 1024 need privileges [default: 6969]
        #[arg(short = 'P', long)]
        port: Option<u16>,

        /// Directory to serve [default: .]
        #[arg(short, long)]
        directory: Option<PathBuf>,

        /// Kinds of transfer to allow [default: GET PUT]
        #[arg(long, alias = "restrict_modes", value_enum, num_args = 1.., ignore_case = true)]
        restrict_modes: Option<Vec<TransferKind>>,
    },

    /// GET a file from a server or PUT one to it
    Client {
        #[arg(value_enum, ignore_case = true)]
        kind: TransferKind,

        /// IP address of the server
        server: IpAddr,

        /// File on the server for GET, local file for PUT
        source: String,

        /// Local file for GET, file on the server for PUT
        destination: String,

        /// Server port [default: 69]
        #[arg(short = 'P', long)]
        port: Option<u16>,

        /// Block size to request
        #[arg(long)]
        blksize: Option<u16>,

        /// Window size to request
        #[arg(long)]
        windowsize: Option<u16>,

        /// Transfer mode: octet or netascii
        #[arg(long)]
        mode: Option<String>,
    },
}

fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    init_logger(cli.verbose);

    let file_config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match command {
        Commands::Server {
            host,
            port,
            directory,
            restrict_modes,
        } => {
            let config = Config::with_defaults()
                .merge_file(&file_config.server)?
                .merge_cli(host, port, directory, restrict_modes.as_deref());
            server::run(config).await
        }
        Commands::Client {
            kind,
            server,
            source,
            destination,
            port,
            blksize,
            windowsize,
            mode,
        } => {
            let mut config = ClientConfig::new(server, 69).merge_file(&file_config.client)?;
            if let Some(port) = port {
                config.server_port = port;
            }
            if let Some(blksize) = blksize {
                config = config.with_block_size(blksize);
            }
            if let Some(windowsize) = windowsize {
                config = config.with_window_size(windowsize);
            }
            if let Some(mode) = mode {
                config = config.with_mode(TransferMode::parse(&mode)?);
            }
            client::run(config, kind, &source, &destination).await
        }
    }
}
