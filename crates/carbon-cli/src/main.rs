//! Command-line driver: `carbon <source-file> [script-args...]`.
//!
//! Compiles the file (imports resolve through the filesystem), prints any
//! warnings, runs the module, and exits non-zero on compile-time or
//! runtime errors with the rendered diagnostic on stderr.

mod natives;

use std::process::ExitCode;
use std::rc::Rc;

use carbon::{Carbon, Error, ErrorKind, NativeClasses};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let file_path = match args.get(1) {
        Some(path) => path.clone(),
        None => {
            eprintln!("usage: carbon <source-file> [script-args...]");
            return ExitCode::FAILURE;
        }
    };
    let script_args: Vec<String> = args.iter().skip(2).cloned().collect();

    let source = match std::fs::read_to_string(&file_path) {
        Ok(source) => source,
        Err(e) => {
            let err = Error::new(ErrorKind::IoError, format!("cannot read \"{}\": {}", file_path, e));
            eprint!("{}", err.render());
            return ExitCode::FAILURE;
        }
    };

    let mut registry = NativeClasses::new();
    natives::register(&mut registry);

    let mut carbon = Carbon::with_natives(registry);
    carbon.set_module_loader(Rc::new(|path: &str| {
        std::fs::read_to_string(path)
            .map_err(|e| Error::new(ErrorKind::IoError, format!("cannot read \"{}\": {}", path, e)))
    }));

    if let Err(e) = carbon.compile(&file_path, &source) {
        eprint!("{}", e.render());
        return ExitCode::FAILURE;
    }
    for warning in carbon.take_warnings() {
        eprint!("{}", warning.render());
    }

    match carbon.run(&file_path, script_args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprint!("{}", e.render());
            ExitCode::FAILURE
        }
    }
}
