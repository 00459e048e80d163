use clap::Parser;
use hvt::cli::Cli;

fn main() {
    let cli = Cli::parse();

    match hvt::run(&cli) {
        Ok(status) => std::process::exit(status),
        Err(e) => {
            eprintln!("hvt: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
