use super::schema::{ScaffoldBundle, ScaffoldFile};

pub const UNTITLED: &str = "Untitled Paper";

const FALLBACK_TASKS: [&str; 3] = [
    "IMPLEMENT CORE ALGORITHM",
    "ADD TEST HARNESS",
    "WRITE PERFORMANCE NOTES",
];

/// Deterministic TypeScript scaffold used whenever the model is unavailable
/// or its output cannot be validated.
pub fn fallback_bundle(title: Option<&str>) -> ScaffoldBundle {
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED);

    let files = vec![
        ScaffoldFile::new(
            "README.md",
            "markdown",
            format!("# {}\n\nGenerated scaffold for reproduction.\n", title),
        ),
        ScaffoldFile::new("package.json", "json", package_json(title)),
        ScaffoldFile::new(
            "src/solution.ts",
            "typescript",
            format!(
                "// {} reproduction scaffold\n\nexport function run(): string {{\n  return 'todo';\n}}\n",
                title
            ),
        ),
        ScaffoldFile::new(
            "tests/solution.test.ts",
            "typescript",
            "import { test } from 'node:test';\n\
             import assert from 'node:assert/strict';\n\
             import { run } from '../src/solution';\n\
             \n\
             test('returns placeholder', () => {\n  assert.equal(run(), 'todo');\n});\n",
        ),
    ];

    ScaffoldBundle::from_parts(
        FALLBACK_TASKS.iter().map(|t| t.to_string()).collect(),
        files,
    )
}

fn package_json(title: &str) -> String {
    let manifest = serde_json::json!({
        "name": package_name(title),
        "private": true,
        "type": "module",
        "scripts": { "test": "tsx --test tests/" },
        "devDependencies": { "tsx": "^4.19.0", "typescript": "^5.6.0" }
    });
    format!(
        "{}\n",
        serde_json::to_string_pretty(&manifest).unwrap_or_else(|_| manifest.to_string())
    )
}

/// npm package names are lower-case, hyphen-separated and at most 214 bytes.
fn package_name(title: &str) -> String {
    let slug: String = title
        .to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug: String = slug.chars().take(64).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "paper-reproduction".to_string()
    } else {
        slug.to_string()
    }
}
