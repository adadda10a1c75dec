// CLI modules
mod args;
mod op;
mod ops;
mod state;

use args::Args;
use clap::{Parser, Subcommand};
use op::Op;
use ops::{Cert, Read, RenewToken, Setup, Version};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

command_enum! {
    (Setup, Setup),
    (Cert, Cert),
    (RenewToken, RenewToken),
    (Read, Read),
    (Version, Version),
}

/// Log to stderr so stdout carries only command output.
/// The returned guard must live until the process exits.
fn init_logging(level: tracing::Level) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(writer)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stderr_layer).init();
    guard
}

/// Error text as written to stderr, ending in exactly one newline
fn error_text(err: &dyn std::fmt::Display) -> String {
    let text = err.to_string();
    if text.ends_with('\n') {
        text
    } else {
        format!("{}\n", text)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let guard = init_logging(args.log_level);

    let ctx = match op::OpContext::new(&args) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprint!("{}", error_text(&e));
            drop(guard);
            std::process::exit(1);
        }
    };

    let result = args.command.execute(&ctx).await;
    // flush pending log lines before exiting
    drop(guard);

    match result {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprint!("{}", error_text(&e));
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_is_the_bare_message() {
        assert_eq!(error_text(&"permission denied"), "permission denied\n");
        assert_eq!(
            error_text(&"1 error occurred:\n\t* sealed\n\n"),
            "1 error occurred:\n\t* sealed\n\n"
        );
    }
}
