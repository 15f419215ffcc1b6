// Fixed instruction templates sent ahead of caller-supplied code

const ANALYSIS: &str = "Generate a **function relationship map** for the given code with:\n\
1. Function Name\n\
2. Variables: List with brief roles.\n\
3. Return Value: What it returns and why.\n\
4. Relationships: Variable/function interactions (e.g., calls, return usage).\n\
**Rules**: No code modifications.\n\
Then, add inline comments/documentation for the following code. Comments should describe the purpose \
of each block of code or important lines without altering the original structure or indentation.";

const RECODE: &str = "Reconstruct the following code while maintaining its original logic. \
The goal is to improve its readability, structure, and clarity, as though it were written from scratch \
in a cleaner and more modern style. \
Do not alter the core logic of the code, only refactor the way it is written without commentary.";

/// Marker prepended to the input when the AI produced nothing
const FALLBACK_MARKER: &str = "// AI invocation failed";

pub fn analysis(code: &str) -> String {
    format!("{}\n{}", ANALYSIS, code)
}

pub fn recode(code: &str) -> String {
    format!("{}\n{}", RECODE, code)
}

pub fn translate(lang: &str, code: &str) -> String {
    format!(
        "Translate the following code into {}. Ensure that the logic remains exactly the same \
         and that the translated code adheres to the syntax and conventions of the target language.\n{}",
        lang, code
    )
}

pub fn fallback(code: &str) -> String {
    format!("{}\n{}", FALLBACK_MARKER, code)
}
