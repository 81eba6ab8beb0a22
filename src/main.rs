use clap::Parser;
use std::io::{self, IsTerminal};
use tracker_attachments::cli::commands::{self, GlobalOptions};
use tracker_attachments::cli::{Cli, Commands};
use tracker_attachments::config::CliOverrides;
use tracker_attachments::logging::init_logging;
use tracker_attachments::{AttachError, StructuredError};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet, None) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let global = GlobalOptions {
        dir: cli.dir.clone(),
        json: cli.json,
        quiet: cli.quiet,
    };

    let result = match &cli.command {
        Commands::Init { force } => commands::init::execute(*force, &global),
        Commands::Attach(args) => commands::attach::execute(args, &global),
        Commands::Detach { id } => commands::detach::execute(id, &global),
        Commands::List { issue } => commands::list::execute(issue.as_deref(), &global),
        Commands::Show { id } => commands::show::execute(id, &global),
        Commands::Dedup { command } => commands::dedup::execute(command, &global),
    };

    if let Err(e) = result {
        handle_error(&e, &global);
    }
}

fn handle_error(err: &AttachError, global: &GlobalOptions) -> ! {
    let structured = structured_for(err, global);
    let exit_code = structured.code.exit_code();

    // JSON if --json or stdout is not a terminal
    let use_json = global.json || !io::stdout().is_terminal();

    if use_json {
        let json = structured.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        let use_color = io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        eprintln!("{}", structured.to_human(use_color));
    }

    std::process::exit(exit_code);
}

/// Attach similar-ID suggestions to not-found errors when the project opens.
fn structured_for(err: &AttachError, global: &GlobalOptions) -> StructuredError {
    if let AttachError::AttachmentNotFound { id } = err {
        if let Ok((_, manager)) = commands::open_manager(global, &CliOverrides::default()) {
            if let Ok(attachments) = manager.list(None) {
                let known: Vec<String> = attachments.into_iter().map(|a| a.id).collect();
                return StructuredError::attachment_not_found(id, &known);
            }
        }
    }
    StructuredError::from_error(err)
}
