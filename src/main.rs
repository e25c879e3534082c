use std::{env, process};

use mio::Poll;
use webserv::{config::types::AppConfig, error::Result, server::Server, signals};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!(
            "usage: {} <config-file>",
            args.first().map(String::as_str).unwrap_or("webserv")
        );
        process::exit(1);
    }

    if let Err(e) = run(&args[1]) {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn run(config_path: &str) -> Result<()> {
    let content = std::fs::read_to_string(config_path)?;
    let config: AppConfig = content.parse()?;

    config.display_config();
    signals::install();

    let poll = Poll::new()?;
    let mut server = Server::new(config, &poll)?;
    server.run(poll)
}
