use anyhow::Context as _;
use spirv_lint::{Level, Linter};

/// Check a SPIR-V binary for derivatives under non-uniform control flow.
#[derive(argh::FromArgs, Debug)]
struct Args {
    /// show version
    #[argh(switch)]
    version: bool,

    /// the SPIR-V binary to lint
    #[argh(positional)]
    in_file: Option<String>,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    env_logger::init();

    let args: Args = argh::from_env();
    if args.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let Some(in_file) = args.in_file else {
        anyhow::bail!("expected exactly one argument: in_file");
    };

    let bytes = std::fs::read(&in_file).with_context(|| format!("reading {in_file}"))?;
    anyhow::ensure!(
        bytes.len() % 4 == 0,
        "{in_file} is not a SPIR-V binary: its size is not a multiple of 4"
    );
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let mut linter = Linter::new();
    linter.set_message_consumer(Box::new(|level, _, _, message| {
        if level == Level::Error {
            eprint!("error: ");
        }
        eprintln!("{message}");
    }));

    log::debug!("linting {in_file}");
    if !linter.run(&words) {
        // the decode diagnostic was already emitted on the consumer
        std::process::exit(1);
    }
    Ok(())
}
