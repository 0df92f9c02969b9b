//! Runner-block generation.
//!
//! The runner is the second text block of an execution unit. It carries the
//! user script's environment-metadata declaration verbatim, so whatever
//! provisioning step precedes it installs the identical dependency set, and
//! it only uses the target language's standard library beyond that.
//!
//! The runner imports the user code as a module rather than executing it as
//! a script: entry-point side effects never fire, and the callable stays
//! resolvable by its qualified name.

use super::ScriptSource;

/// Render the runner block for one execution unit.
pub(super) fn render(
    source: &ScriptSource,
    qualified_name: &str,
    user_path: &str,
    payload_path: &str,
    out_path: &str,
) -> String {
    let metadata = if source.metadata().is_empty() {
        String::new()
    } else {
        format!("{}\n\n", source.metadata().trim_end_matches('\n'))
    };

    format!(
        r#"{metadata}import base64
import importlib.util
import json
import os
import sys

MARKER = "b64json:"
LOCATOR = "b64ref:"


def decode(token):
    token = token.strip()
    if token.startswith(LOCATOR):
        record = json.loads(base64.b64decode(token[len(LOCATOR):]))
        path = os.path.join(record["store"], record["key"])
        with open(path, "rb") as handle:
            return json.loads(handle.read())
    if not token.startswith(MARKER):
        raise ValueError("unrecognized payload marker")
    return json.loads(base64.b64decode(token[len(MARKER):]))


def encode(value):
    raw = json.dumps(value).encode("utf-8")
    return MARKER + base64.b64encode(raw).decode("ascii")


def load_module(path):
    spec = importlib.util.spec_from_file_location("{module_name}", path)
    module = importlib.util.module_from_spec(spec)
    sys.modules["{module_name}"] = module
    spec.loader.exec_module(module)
    return module


def resolve(module, dotted):
    target = module
    for part in dotted.split("."):
        try:
            target = getattr(target, part)
        except AttributeError:
            raise AttributeError(
                "cannot resolve %r: no attribute %r" % (dotted, part)
            ) from None
    return target


def main():
    module = load_module("{user_path}")
    target = resolve(module, "{qualified_name}")
    with open("{payload_path}") as handle:
        args = decode(handle.read())
    result = target(*args)
    with open("{out_path}", "w") as handle:
        handle.write(encode(result))


if __name__ == "__main__":
    main()
"#,
        metadata = metadata,
        module_name = module_name(source.identity()),
        user_path = user_path,
        qualified_name = qualified_name,
        payload_path = payload_path,
        out_path = out_path,
    )
}

/// Derive a valid module name from a script identity.
fn module_name(identity: &str) -> String {
    let cleaned: String = identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("_{}", cleaned)
    } else if cleaned.is_empty() {
        "_script".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name_sanitization() {
        assert_eq!(module_name("my-pipeline.py"), "my_pipeline_py");
        assert_eq!(module_name("3rd_try"), "_3rd_try");
        assert_eq!(module_name(""), "_script");
    }

    #[test]
    fn test_runner_imports_module_and_resolves_dotted_name() {
        let source = ScriptSource::new("job", "def f(x):\n    return x\n", "");
        let runner = render(&source, "Tools.process", "job.py", "job.in", "job.out");

        assert!(runner.contains("spec_from_file_location(\"job\", path)"));
        assert!(runner.contains("resolve(module, \"Tools.process\")"));
        assert!(runner.contains("dotted.split(\".\")"));
        // Imported as a module, never run as a script entry point.
        assert!(runner.contains("exec_module"));
    }

    #[test]
    fn test_runner_carries_metadata_block_verbatim() {
        let metadata = "# /// script\n# dependencies = [\"numpy\"]\n# ///";
        let source = ScriptSource::new("job", "x = 1\n", metadata);
        let runner = render(&source, "f", "job.py", "job.in", "job.out");

        assert!(runner.starts_with(metadata));
    }

    #[test]
    fn test_runner_without_metadata_starts_with_imports() {
        let source = ScriptSource::new("job", "x = 1\n", "");
        let runner = render(&source, "f", "job.py", "job.in", "job.out");
        assert!(runner.starts_with("import base64"));
    }
}
