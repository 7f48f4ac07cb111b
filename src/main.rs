use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use log::{LevelFilter, Log, Metadata, Record};

use zoby::diagnostic::ansi::AnsiRenderer;
use zoby::diagnostic::{json, registry, Diagnostic};
use zoby::vm::{persist, CompileOptions, Program, Vm, VmOptions};
use zoby::ZobyError;

#[derive(Parser, Debug)]
#[command(name = "zoby", version, about = "Compile and run ZobyScript programs")]
struct Cli {
    /// Script to run: source text, or bytecode when the name ends in `.zsc`
    #[arg(required_unless_present = "explain")]
    file: Option<PathBuf>,

    /// Turn off constant folding, int specialization and dead-branch elimination
    #[arg(long)]
    no_opt: bool,

    /// Write compiled bytecode to OUT instead of running
    #[arg(long, value_name = "OUT")]
    emit_bytecode: Option<PathBuf>,

    /// Print the bytecode listing instead of running
    #[arg(long)]
    disasm: bool,

    /// Print the parsed program as JSON instead of running
    #[arg(long)]
    ast: bool,

    /// Report errors as one JSON object per line on stderr
    #[arg(long)]
    json: bool,

    /// Disable the global-variable inline cache
    #[arg(long)]
    no_cache: bool,

    /// Maximum nesting of function calls
    #[arg(long, value_name = "N", default_value_t = 1000)]
    max_depth: usize,

    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Describe an error code such as ZBY-R004
    #[arg(long, value_name = "CODE")]
    explain: Option<String>,
}

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// `ZOBY_LOG` wins over `-v` when it names a valid level.
fn init_logging(verbose: u8) {
    let from_flags = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let level = std::env::var("ZOBY_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(from_flags);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

struct Reporter {
    json: bool,
    color: bool,
}

impl Reporter {
    fn report(&self, d: Diagnostic) {
        if self.json {
            eprintln!("{}", json::render(&d));
        } else {
            eprint!("{}", AnsiRenderer { use_color: self.color }.render(&d));
        }
    }

    fn error(&self, e: &ZobyError, source: Option<&str>) -> ExitCode {
        let mut d = Diagnostic::from(e);
        if let Some(src) = source {
            d = d.with_source(src);
        }
        self.report(d);
        ExitCode::FAILURE
    }

    fn fail(&self, message: String) -> ExitCode {
        self.report(Diagnostic::error(message));
        ExitCode::FAILURE
    }
}

fn explain(code: &str) -> ExitCode {
    match registry::lookup(&code.to_ascii_uppercase()) {
        Some(entry) => {
            print!("{}", entry.long);
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("unknown error code '{code}'");
            ExitCode::FAILURE
        }
    }
}

fn is_bytecode(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "zsc")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(code) = &cli.explain {
        return explain(code);
    }
    let Some(path) = cli.file.as_deref() else {
        return ExitCode::FAILURE;
    };

    let reporter = Reporter {
        json: cli.json,
        color: io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    };

    let (program, source) = if is_bytecode(path) {
        if cli.ast {
            return reporter.fail("--ast needs a source file, not bytecode".to_string());
        }
        log::info!("loading bytecode from {}", path.display());
        match persist::load(path) {
            Ok(program) => (program, None),
            Err(e) => return reporter.error(&ZobyError::from(e), None),
        }
    } else {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => return reporter.fail(format!("cannot read {}: {e}", path.display())),
        };
        if cli.ast {
            return print_ast(&reporter, &source);
        }
        let options = if cli.no_opt { CompileOptions::unoptimized() } else { CompileOptions::default() };
        match zoby::compile_source(&source, options) {
            Ok(program) => (program, Some(source)),
            Err(e) => return reporter.error(&e, Some(&source)),
        }
    };

    if let Some(out) = &cli.emit_bytecode {
        return match persist::save(&program, out) {
            Ok(()) => {
                log::info!("wrote bytecode to {}", out.display());
                ExitCode::SUCCESS
            }
            Err(e) => reporter.error(&ZobyError::from(e), None),
        };
    }
    if cli.disasm {
        print!("{}", program.disassemble());
        return ExitCode::SUCCESS;
    }

    let options = VmOptions { inline_cache: !cli.no_cache, max_call_depth: cli.max_depth };
    run(&reporter, &program, options, source.as_deref())
}

fn print_ast(reporter: &Reporter, source: &str) -> ExitCode {
    let ast = match zoby::parse_source(source) {
        Ok(ast) => ast,
        Err(e) => return reporter.error(&e, Some(source)),
    };
    match serde_json::to_string_pretty(&ast) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => reporter.fail(format!("cannot serialize AST: {e}")),
    }
}

fn run(reporter: &Reporter, program: &Program, options: VmOptions, source: Option<&str>) -> ExitCode {
    let stdout = io::stdout();
    let mut output = stdout.lock();
    let stdin = io::stdin();
    let mut input = stdin.lock();

    let start = Instant::now();
    let mut vm = Vm::with_options(&mut output, &mut input, options);
    let result = vm.run(program);
    log::info!("executed in {:?}, {} global cache hits", start.elapsed(), vm.cache_hits());

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => reporter.error(&ZobyError::from(e), source),
    }
}
