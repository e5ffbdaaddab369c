//! Command line front end: reads one line, runs one TLS exchange,
//! prints the reply.

use std::io::{self, BufRead, Write};
use std::process;
use std::time::Duration;

use clap::Parser;
use tlsline::{run, Options, MAX_MESSAGE_LEN};

/// Sends one line of input to a TLS server and prints the reply.
///
/// The server's certificate chain must validate against the CA bundle
/// given with --cafile; each certificate's subject is printed as it is
/// verified.
#[derive(Debug, Parser)]
struct Args {
    /// Connect to this port
    #[clap(long, default_value = "443")]
    port: u16,

    /// Read trust anchors from this PEM file
    #[clap(long)]
    cafile: String,

    /// Send MESSAGE instead of reading a line from stdin
    #[clap(long)]
    message: Option<String>,

    /// Give up if the peer stalls for this many seconds (0 disables)
    #[clap(long, default_value = "30")]
    timeout: u64,

    /// Emit log output
    #[clap(long)]
    verbose: bool,

    /// Which hostname to connect to
    hostname: String,
}

fn main() {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::new()
            .parse_filters("trace")
            .init();
    }

    let message = match args.message {
        Some(message) => message.into_bytes(),
        None => match prompt_for_line() {
            Ok(line) => line,
            Err(err) => {
                eprintln!("cannot read message: {err}");
                process::exit(1);
            }
        },
    };

    let options = Options {
        hostname: args.hostname,
        port: args.port,
        cafile: args.cafile,
        timeout: match args.timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
    };

    match run(&options, &message) {
        Ok(reply) => {
            let mut stdout = io::stdout();
            // The reply is echoed byte-for-byte; it need not be UTF-8.
            stdout.write_all(b"Reply: ").unwrap();
            stdout.write_all(&reply).unwrap();
            stdout.write_all(b"\n").unwrap();
        }
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    }
}

/// Reads one line from stdin, truncated at the session's message
/// limit. The trailing newline is not part of the message.
fn prompt_for_line() -> io::Result<Vec<u8>> {
    print!("Enter message: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }

    let mut bytes = line.into_bytes();
    bytes.truncate(MAX_MESSAGE_LEN);
    Ok(bytes)
}
