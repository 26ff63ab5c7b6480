//! Native classes the command-line host exposes to scripts: `File` and
//! `Os`. They live in the driver, not the core; scripts reach them only
//! through the native-class registry.

use std::cell::RefCell;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use carbon::{ArgSpec, Error, ErrorKind, NativeClasses, Object, Result, Var, Vm};

/// `File.READ` / `WRITE` / `APPEND` / `BINARY` mode bits.
pub const MODE_READ: i64 = 1 << 0;
pub const MODE_WRITE: i64 = 1 << 1;
pub const MODE_APPEND: i64 = 1 << 2;
pub const MODE_BINARY: i64 = 1 << 3;

struct FileState {
    handle: Option<std::fs::File>,
    path: String,
    mode: i64,
}

/// A host file handle: `open`, `read`, `write`, `size`, `close`.
pub struct File {
    state: RefCell<FileState>,
}

impl File {
    fn new() -> Self {
        Self {
            state: RefCell::new(FileState {
                handle: None,
                path: String::new(),
                mode: MODE_READ,
            }),
        }
    }

    fn open(&self, path: &str, mode: i64) -> Result<()> {
        let mut options = OpenOptions::new();
        options.read(mode & MODE_READ != 0);
        if mode & MODE_APPEND != 0 {
            options.append(true).create(true);
        } else if mode & MODE_WRITE != 0 {
            options.write(true).create(true).truncate(true);
        }
        let handle = options
            .open(path)
            .map_err(|e| Error::new(ErrorKind::IoError, format!("cannot open \"{}\": {}", path, e)))?;
        let mut state = self.state.borrow_mut();
        state.handle = Some(handle);
        state.path = path.to_string();
        state.mode = mode;
        Ok(())
    }

    fn read(&self) -> Result<String> {
        let mut state = self.state.borrow_mut();
        let path = state.path.clone();
        match &mut state.handle {
            Some(handle) => {
                let mut text = String::new();
                handle
                    .read_to_string(&mut text)
                    .map_err(|e| Error::new(ErrorKind::IoError, format!("read failed on \"{}\": {}", path, e)))?;
                Ok(text)
            }
            None => Err(file_not_open()),
        }
    }

    fn write(&self, text: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let path = state.path.clone();
        match &mut state.handle {
            Some(handle) => handle
                .write_all(text.as_bytes())
                .map_err(|e| Error::new(ErrorKind::IoError, format!("write failed on \"{}\": {}", path, e))),
            None => Err(file_not_open()),
        }
    }

    fn size(&self) -> Result<i64> {
        let mut state = self.state.borrow_mut();
        match &mut state.handle {
            Some(handle) => {
                let at = handle
                    .stream_position()
                    .map_err(|e| Error::new(ErrorKind::IoError, e.to_string()))?;
                let end = handle
                    .seek(SeekFrom::End(0))
                    .map_err(|e| Error::new(ErrorKind::IoError, e.to_string()))?;
                handle
                    .seek(SeekFrom::Start(at))
                    .map_err(|e| Error::new(ErrorKind::IoError, e.to_string()))?;
                Ok(end as i64)
            }
            None => Err(file_not_open()),
        }
    }

    fn close(&self) {
        self.state.borrow_mut().handle = None;
    }
}

fn file_not_open() -> Error {
    Error::new(ErrorKind::IoError, "file is not open.")
}

impl Object for File {
    fn class_name(&self) -> String {
        "File".to_string()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn call_method(&self, vm: &Vm, this: &Var, name: &str, args: &mut [Var]) -> Result<Var> {
        vm.registry().call_method_on(vm, this, "File", name, args)
    }

    fn get_member(&self, name: &str) -> Result<Var> {
        match name {
            "path" => Ok(Var::String(self.state.borrow().path.clone())),
            "mode" => Ok(Var::Int(self.state.borrow().mode)),
            _ => Err(Error::new(
                ErrorKind::AttributeError,
                format!("File has no member \"{}\".", name),
            )),
        }
    }

    fn to_display_string(&self) -> String {
        format!("[File: \"{}\"]", self.state.borrow().path)
    }
}

fn expect_file(this: &Var) -> Result<&File> {
    this.as_object::<File>()
        .ok_or_else(|| Error::new(ErrorKind::TypeError, "expected a File instance."))
}

fn expect_string(args: &[Var], index: usize) -> Result<String> {
    args.get(index)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::new(
                ErrorKind::TypeError,
                format!("expected a String at argument {}.", index),
            )
        })
}

/// Register the command-line host's native classes.
pub fn register(registry: &mut NativeClasses) {
    registry.class("File", |c| {
        c.ctor(ArgSpec::exact(0), |_vm, _args| {
            Ok(Var::Object(std::rc::Rc::new(File::new())))
        });
        c.enumeration(
            "Mode",
            vec![
                ("READ", MODE_READ),
                ("WRITE", MODE_WRITE),
                ("APPEND", MODE_APPEND),
                ("BINARY", MODE_BINARY),
            ],
        );
        c.method(
            "open",
            ArgSpec::with_defaults(2, vec![Var::Int(MODE_READ)]),
            |_vm, this, args| {
                let file = expect_file(this)?;
                let path = expect_string(args, 0)?;
                let mode = args[1].as_int().unwrap_or(MODE_READ);
                file.open(&path, mode)?;
                Ok(Var::Null)
            },
        );
        c.method("read", ArgSpec::exact(0), |_vm, this, _args| {
            Ok(Var::String(expect_file(this)?.read()?))
        });
        c.method("write", ArgSpec::exact(1), |_vm, this, args| {
            expect_file(this)?.write(&args[0].to_display_string())?;
            Ok(Var::Null)
        });
        c.method("size", ArgSpec::exact(0), |_vm, this, _args| {
            Ok(Var::Int(expect_file(this)?.size()?))
        });
        c.method("is_open", ArgSpec::exact(0), |_vm, this, _args| {
            Ok(Var::Bool(expect_file(this)?.state.borrow().handle.is_some()))
        });
        c.method("close", ArgSpec::exact(0), |_vm, this, _args| {
            expect_file(this)?.close();
            Ok(Var::Null)
        });
    });

    registry.class("Os", |c| {
        c.static_func(
            "abs_path",
            ArgSpec::typed(1, vec!["String"]),
            |_vm, args| {
                let path = expect_string(args, 0)?;
                let abs = std::path::absolute(Path::new(&path))
                    .map_err(|e| Error::new(ErrorKind::IoError, e.to_string()))?;
                Ok(Var::String(abs.to_string_lossy().into_owned()))
            },
        );
        c.static_func(
            "rel_path",
            ArgSpec::with_defaults(2, vec![Var::String(String::new())]),
            |_vm, args| {
                let path = expect_string(args, 0)?;
                let base = match args.get(1).and_then(|v| v.as_str()) {
                    Some("") | None => std::env::current_dir()
                        .map_err(|e| Error::new(ErrorKind::IoError, e.to_string()))?,
                    Some(base) => Path::new(base).to_path_buf(),
                };
                let abs = std::path::absolute(Path::new(&path))
                    .map_err(|e| Error::new(ErrorKind::IoError, e.to_string()))?;
                let rel = pathdiff(&abs, &base).unwrap_or(abs.clone());
                Ok(Var::String(rel.to_string_lossy().into_owned()))
            },
        );
    });
}

/// Minimal relative-path computation (both paths absolute).
fn pathdiff(path: &Path, base: &Path) -> Option<std::path::PathBuf> {
    let mut path_parts: Vec<_> = path.components().collect();
    let mut base_parts: Vec<_> = base.components().collect();
    let mut common = 0;
    while common < path_parts.len()
        && common < base_parts.len()
        && path_parts[common] == base_parts[common]
    {
        common += 1;
    }
    path_parts.drain(..common);
    base_parts.drain(..common);
    let mut out = std::path::PathBuf::new();
    for _ in base_parts {
        out.push("..");
    }
    for part in path_parts {
        out.push(part);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_mode_bits_are_distinct() {
        let bits = [MODE_READ, MODE_WRITE, MODE_APPEND, MODE_BINARY];
        for (i, a) in bits.iter().enumerate() {
            for b in bits.iter().skip(i + 1) {
                assert_eq!(a & b, 0);
            }
        }
    }

    #[test]
    fn registry_exposes_file_and_os() {
        let mut registry = NativeClasses::new();
        register(&mut registry);
        assert!(registry.is_registered("File"));
        assert!(registry.is_registered("Os"));
        assert_eq!(
            registry.get_static_member("File", "WRITE").unwrap(),
            Var::Int(MODE_WRITE)
        );
    }
}
