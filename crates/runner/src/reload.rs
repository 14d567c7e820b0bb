//! Hot-reload preamble for watched modules.

/// Whether `name` is a dotted Python module path.
pub fn is_module_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c == '_' || c.is_alphabetic())
                && chars.all(|c| c == '_' || c.is_alphanumeric())
        })
}

/// Python source that reloads every listed module already imported.
///
/// Modules never imported are left alone; names that are not module paths
/// are skipped.
pub fn reload_preamble<'a, I>(modules: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut source = String::from("import importlib\nimport sys\n");
    for name in modules {
        if !is_module_name(name) {
            tracing::warn!(module = name, "skipping invalid module name");
            continue;
        }
        source.push_str(&format!(
            "\nif \"\"\"{name}\"\"\" in sys.modules:\n    importlib.reload(sys.modules[\"\"\"{name}\"\"\"])\n"
        ));
    }
    source.push_str("\ndel importlib\ndel sys\n");
    source
}
