//! Selection of the functions worth annotating from a full Ghidra dump
//!
//! The dump holds one block per function, introduced by `// Function: NAME`
//! or, when Ghidra gave up on it, `// Failed to decompile function: NAME`.
//! Only `main` and the non-library functions it mentions are kept.

use anyhow::{bail, Result};
use std::collections::HashSet;

const FUNCTION_HEADER: &str = "// Function: ";
const FAILED_HEADER: &str = "// Failed to decompile function: ";

/// Runtime and libc symbols that never get their own block in the output
pub const STANDARD_LIBRARY: [&str; 8] = [
    "printf", "scanf", "putchar", "exit", "malloc", "free", "puts", "__main",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompiledFunction {
    pub name: String,
    /// C text, `None` when decompilation failed
    pub code: Option<String>,
}

pub fn parse_dump(dump: &str) -> Vec<DecompiledFunction> {
    let mut functions = Vec::new();
    let mut current: Option<(String, bool, Vec<&str>)> = None;

    for line in dump.lines() {
        let header = line
            .strip_prefix(FUNCTION_HEADER)
            .map(|name| (name, true))
            .or_else(|| line.strip_prefix(FAILED_HEADER).map(|name| (name, false)));

        match header {
            Some((name, ok)) => {
                functions.extend(current.take().map(finish_block));
                current = Some((name.trim().to_string(), ok, Vec::new()));
            }
            None => {
                if let Some((_, _, body)) = current.as_mut() {
                    body.push(line);
                }
            }
        }
    }
    functions.extend(current.map(finish_block));
    functions
}

fn finish_block((name, ok, body): (String, bool, Vec<&str>)) -> DecompiledFunction {
    let code = ok.then(|| body.join("\n").trim_end().to_string());
    DecompiledFunction { name, code }
}

fn identifiers(code: &str) -> HashSet<&str> {
    code.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .collect()
}

/// `main` followed by every other function whose name appears as an
/// identifier in `main`, in dump order
pub fn select(functions: &[DecompiledFunction]) -> Result<Vec<&DecompiledFunction>> {
    let Some(main) = functions.iter().find(|f| f.name == "main") else {
        bail!("'main' function not found");
    };
    let Some(main_code) = main.code.as_deref() else {
        bail!("Failed to decompile main");
    };

    let referenced = identifiers(main_code);
    let mut seen: HashSet<&str> = HashSet::from(["main"]);
    let mut selected = vec![main];

    for function in functions {
        let name = function.name.as_str();
        if STANDARD_LIBRARY.contains(&name) || !referenced.contains(name) {
            continue;
        }
        if seen.insert(name) {
            selected.push(function);
        }
    }
    Ok(selected)
}

pub fn render(functions: &[&DecompiledFunction]) -> String {
    let mut out = String::new();
    for function in functions {
        match &function.code {
            Some(code) => {
                out.push_str(FUNCTION_HEADER);
                out.push_str(&function.name);
                out.push('\n');
                out.push_str(code);
                out.push_str("\n\n");
            }
            None => {
                out.push_str(FAILED_HEADER);
                out.push_str(&function.name);
                out.push_str("\n\n");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
// Function: _start
void _start(void)
{
  main();
}

// Function: helper
int helper(int x)
{
  return x + 1;
}

// Function: helper_two
int helper_two(void)
{
  return 2;
}

// Failed to decompile function: broken

// Function: main
int main(void)
{
  int r = helper(1);
  printf(\"%d\\n\",r);
  broken();
  return 0;
}

// Function: printf
int printf(char *fmt,...)
{
  return 0;
}

";

    #[test]
    fn test_parse_blocks_in_order() {
        let functions = parse_dump(DUMP);
        let names: Vec<&str> = functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["_start", "helper", "helper_two", "broken", "main", "printf"]);
        assert_eq!(functions[1].code.as_deref(), Some("int helper(int x)\n{\n  return x + 1;\n}"));
        assert_eq!(functions[3].code, None);
    }

    #[test]
    fn test_select_whole_identifiers_only() {
        let functions = parse_dump(DUMP);
        let selected = select(&functions).unwrap();
        let names: Vec<&str> = selected.iter().map(|f| f.name.as_str()).collect();

        // helper_two is not called, only shares a prefix; printf is a library symbol
        assert_eq!(names, ["main", "helper", "broken"]);
    }

    #[test]
    fn test_render_main_first() {
        let functions = parse_dump(DUMP);
        let rendered = render(&select(&functions).unwrap());

        assert!(rendered.starts_with("// Function: main\nint main(void)\n{"));
        assert!(rendered.contains("}\n\n// Function: helper\nint helper(int x)"));
        assert!(rendered.ends_with("// Failed to decompile function: broken\n\n"));
    }

    #[test]
    fn test_missing_main_is_an_error() {
        let functions = parse_dump("// Function: helper\nint helper(void) { return 1; }\n\n");
        let err = select(&functions).unwrap_err();
        assert_eq!(err.to_string(), "'main' function not found");
    }

    #[test]
    fn test_failed_main_is_an_error() {
        let functions = parse_dump("// Failed to decompile function: main\n\n");
        assert!(select(&functions).is_err());
    }

    #[test]
    fn test_text_before_first_header_is_ignored() {
        let functions = parse_dump("INFO banner\n// Function: main\nint main(void) {}\n");
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].code.as_deref(), Some("int main(void) {}"));
    }
}
