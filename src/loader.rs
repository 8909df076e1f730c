use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

use crate::ast::{Import, Program, Span};
use crate::error::{BlochError, Result};
use crate::lexer;
use crate::parser;

lazy_static! {
    static ref DOTTED_PATH: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap();
}

/// Resolves imports against an ordered search path, validates package
/// declarations, rejects cycles, and merges everything into one program
/// with exactly one `main`. Each file contributes its declarations exactly
/// once, in depth-first post-order, so imported initialisation statements
/// run before the importing module's.
pub struct ModuleLoader {
    search_paths: Vec<PathBuf>,
    parsed: HashMap<PathBuf, Program>,
    visited: HashSet<PathBuf>,
    in_progress: Vec<PathBuf>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
            parsed: HashMap::new(),
            visited: HashSet::new(),
            in_progress: Vec::new(),
        }
    }

    pub fn with_search_paths(paths: Vec<PathBuf>) -> Self {
        Self { search_paths: paths, ..Self::new() }
    }

    /// Loads the root source file and every transitive import, returning the
    /// merged program.
    pub fn load(&mut self, path: &Path) -> Result<Program> {
        let root_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let mut merged = Program::default();

        // `bloch/lang/Object.bloch` on the search path is the implicit root
        // of every class hierarchy and is loaded eagerly when present.
        if let Some(object_path) = self.find_root_object(&root_dir) {
            self.visit(&object_path, Span::default(), None, &mut merged)?;
            merged.has_root_object = true;
        }

        self.visit(path, Span::default(), None, &mut merged)?;

        let mains = merged.functions.iter().filter(|f| f.name == "main").count();
        match mains {
            0 => Err(BlochError::semantic(Span::default(), "no 'main' function declared")),
            1 => Ok(merged),
            _ => Err(BlochError::semantic(
                Span::default(),
                "multiple 'main' functions declared across the program",
            )),
        }
    }

    /// Parses a single source string with no import resolution. Used by the
    /// library entry point for in-memory programs and by tests.
    pub fn load_source(source: &str) -> Result<Program> {
        let tokens = lexer::tokenize(source)?;
        let program = parser::parse(tokens)?;
        if !program.imports.is_empty() {
            return Err(BlochError::semantic(
                program.imports[0].span,
                "imports require a source file on disk",
            ));
        }
        let mains = program.functions.iter().filter(|f| f.name == "main").count();
        match mains {
            0 => Err(BlochError::semantic(Span::default(), "no 'main' function declared")),
            1 => Ok(program),
            _ => Err(BlochError::semantic(
                Span::default(),
                "multiple 'main' functions declared across the program",
            )),
        }
    }

    fn find_root_object(&self, root_dir: &Path) -> Option<PathBuf> {
        let relative: PathBuf = ["bloch", "lang", "Object.bloch"].iter().collect();
        self.candidate_dirs(root_dir)
            .into_iter()
            .map(|dir| dir.join(&relative))
            .find(|p| p.is_file())
    }

    /// Search order: the importing file's directory, the configured paths,
    /// then the working directory.
    fn candidate_dirs(&self, importing_dir: &Path) -> Vec<PathBuf> {
        let mut dirs = vec![importing_dir.to_path_buf()];
        dirs.extend(self.search_paths.iter().cloned());
        dirs.push(PathBuf::from("."));
        dirs
    }

    fn visit(
        &mut self,
        path: &Path,
        at: Span,
        expected_package: Option<Vec<String>>,
        merged: &mut Program,
    ) -> Result<()> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.visited.contains(&canonical) {
            return Ok(());
        }
        if let Some(first) = self.in_progress.iter().find(|p| **p == canonical) {
            return Err(BlochError::semantic(
                at,
                format!(
                    "circular import between '{}' and '{}'",
                    display_name(first),
                    display_name(&canonical)
                ),
            ));
        }

        let module = match self.parsed.get(&canonical) {
            Some(p) => p.clone(),
            None => {
                let source = fs::read_to_string(path).map_err(|e| {
                    BlochError::semantic(at, format!("cannot read module '{}': {}", path.display(), e))
                })?;
                let tokens = lexer::tokenize(&source)?;
                let program = parser::parse(tokens)?;
                self.parsed.insert(canonical.clone(), program.clone());
                program
            }
        };

        if let (Some(expected), Some(declared)) = (&expected_package, &module.package) {
            if declared != expected {
                return Err(BlochError::semantic(
                    at,
                    format!(
                        "module '{}' declares package '{}' but is imported as '{}'",
                        display_name(&canonical),
                        declared.join("."),
                        expected.join(".")
                    ),
                ));
            }
        }

        let module_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        self.in_progress.push(canonical.clone());
        let result = self.visit_imports(&module, &module_dir, merged);
        self.in_progress.pop();
        result?;

        self.visited.insert(canonical);
        merge_into(merged, module, at)
    }

    fn visit_imports(&mut self, module: &Program, module_dir: &Path, merged: &mut Program) -> Result<()> {
        for import in &module.imports {
            let dotted = import.path.join(".");
            if !DOTTED_PATH.is_match(&dotted) {
                return Err(BlochError::semantic(import.span, format!("invalid import path '{}'", dotted)));
            }
            let expected: Vec<String> = if import.wildcard {
                import.path.clone()
            } else {
                import.path[..import.path.len() - 1].to_vec()
            };
            for file in self.resolve_import(import, module_dir)? {
                self.visit(&file, import.span, Some(expected.clone()), merged)?;
            }
        }
        Ok(())
    }

    /// A dotted path maps to directories plus a `.bloch` file name; a
    /// terminal `*` loads every `.bloch` file directly in the directory, in
    /// sorted order.
    fn resolve_import(&self, import: &Import, importing_dir: &Path) -> Result<Vec<PathBuf>> {
        for dir in self.candidate_dirs(importing_dir) {
            if import.wildcard {
                let target: PathBuf = import.path.iter().fold(dir, |d, seg| d.join(seg));
                if target.is_dir() {
                    let mut files: Vec<PathBuf> = fs::read_dir(&target)
                        .map_err(|e| {
                            BlochError::semantic(
                                import.span,
                                format!("cannot read directory '{}': {}", target.display(), e),
                            )
                        })?
                        .filter_map(|entry| entry.ok().map(|e| e.path()))
                        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "bloch"))
                        .collect();
                    files.sort();
                    return Ok(files);
                }
            } else {
                let mut target = dir;
                for seg in &import.path[..import.path.len() - 1] {
                    target = target.join(seg);
                }
                target = target.join(format!("{}.bloch", import.path.last().unwrap()));
                if target.is_file() {
                    return Ok(vec![target]);
                }
            }
        }
        Err(BlochError::semantic(
            import.span,
            format!(
                "cannot resolve import '{}{}'",
                import.path.join("."),
                if import.wildcard { ".*" } else { "" }
            ),
        ))
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_into(merged: &mut Program, module: Program, at: Span) -> Result<()> {
    for function in module.functions {
        if merged.functions.iter().any(|f| f.name == function.name) {
            return Err(BlochError::semantic(
                if at == Span::default() { function.span } else { at },
                format!("duplicate top-level function '{}'", function.name),
            ));
        }
        merged.functions.push(function);
    }
    for class in module.classes {
        if merged.classes.iter().any(|c| c.name == class.name) {
            return Err(BlochError::semantic(
                if at == Span::default() { class.span } else { at },
                format!("duplicate class '{}'", class.name),
            ));
        }
        merged.classes.push(class);
    }
    merged.statements.extend(module.statements);
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, source: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, source).unwrap();
        path
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bloch-loader-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn imports_merge_into_one_program() {
        let dir = temp_dir("merge");
        write(&dir, "util.bloch", "function helper() -> int { return 7; }");
        let main = write(&dir, "main.bloch", "import util;\nfunction main() -> void { echo(helper()); }");

        let program = ModuleLoader::new().load(&main).unwrap();
        assert_eq!(program.functions.len(), 2);
    }

    #[test]
    fn diamond_imports_merge_once() {
        let dir = temp_dir("diamond");
        write(&dir, "base.bloch", "function shared() -> int { return 1; }");
        write(&dir, "a.bloch", "import base;\nfunction fa() -> void { }");
        write(&dir, "b.bloch", "import base;\nfunction fb() -> void { }");
        let main = write(&dir, "main.bloch", "import a;\nimport b;\nfunction main() -> void { }");

        let program = ModuleLoader::new().load(&main).unwrap();
        assert_eq!(program.functions.iter().filter(|f| f.name == "shared").count(), 1);
    }

    #[test]
    fn wildcard_imports_load_sorted() {
        let dir = temp_dir("wild");
        write(&dir, "pkg/a.bloch", "package pkg; function fa() -> void { }");
        write(&dir, "pkg/b.bloch", "package pkg; function fb() -> void { }");
        let main = write(&dir, "main.bloch", "import pkg.*;\nfunction main() -> void { }");

        let program = ModuleLoader::new().load(&main).unwrap();
        let names: Vec<_> = program.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["fa", "fb", "main"]);
    }

    #[test]
    fn package_mismatch_is_semantic_error() {
        let dir = temp_dir("pkg");
        write(&dir, "pkg/a.bloch", "package wrong; function fa() -> void { }");
        let main = write(&dir, "main.bloch", "import pkg.a;\nfunction main() -> void { }");

        let err = ModuleLoader::new().load(&main).unwrap_err();
        assert_eq!(err.category(), "Semantic");
    }

    #[test]
    fn import_cycle_is_rejected() {
        let dir = temp_dir("cycle");
        write(&dir, "a.bloch", "import b;\nfunction fa() -> void { }");
        write(&dir, "b.bloch", "import a;\nfunction fb() -> void { }");
        let main = write(&dir, "main.bloch", "import a;\nfunction main() -> void { }");

        let err = ModuleLoader::new().load(&main).unwrap_err();
        assert_eq!(err.category(), "Semantic");
        assert!(err.to_string().contains("circular import"));
    }

    #[test]
    fn exactly_one_main_is_enforced() {
        let dir = temp_dir("mains");
        write(&dir, "extra.bloch", "function main() -> void { }");
        let main = write(&dir, "main.bloch", "import extra;\nfunction main() -> void { }");

        let err = ModuleLoader::new().load(&main).unwrap_err();
        assert!(err.to_string().contains("multiple 'main'"));
    }

    #[test]
    fn root_object_is_loaded_when_present() {
        let dir = temp_dir("object");
        write(&dir, "bloch/lang/Object.bloch", "package bloch.lang; class Object { }");
        let main = write(&dir, "main.bloch", "class A { }\nfunction main() -> void { }");

        let program = ModuleLoader::new().load(&main).unwrap();
        assert!(program.has_root_object);
        assert!(program.classes.iter().any(|c| c.name == "Object"));
    }
}
