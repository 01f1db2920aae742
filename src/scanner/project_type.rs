//! Primary language and framework detection from marker files.

use crate::models::ProjectType;
use crate::scanner::manifest::ComposerManifest;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

/// Detect the project type of the checkout at `root`.
///
/// Marker files are checked in a fixed order. JavaScript comes last because
/// most other stacks carry a `package.json` for their front end.
pub fn detect(root: &Path) -> ProjectType {
    let has = |name: &str| root.join(name).is_file();
    let read = |name: &str| std::fs::read_to_string(root.join(name)).unwrap_or_default();

    if has("composer.json") {
        return ProjectType {
            language: "PHP".to_string(),
            framework: ComposerManifest::parse(&read("composer.json"))
                .ok()
                .and_then(|m| php_framework(&m)),
        };
    }

    if has("requirements.txt") || has("setup.py") || has("pyproject.toml") {
        let text = [read("requirements.txt"), read("setup.py"), read("pyproject.toml")]
            .concat()
            .to_lowercase();
        return project(
            "Python",
            first_match(
                &text,
                &[
                    ("django", "Django"),
                    ("flask", "Flask"),
                    ("fastapi", "FastAPI"),
                    ("pyramid", "Pyramid"),
                ],
            ),
        );
    }

    if has("Gemfile") {
        let gemfile = read("Gemfile").to_lowercase().replace('\'', "\"");
        let framework = if gemfile.contains("gem \"rails\"") {
            Some("Ruby on Rails")
        } else if gemfile.contains("gem \"sinatra\"") {
            Some("Sinatra")
        } else {
            None
        };
        return project("Ruby", framework);
    }

    if has("pom.xml") || has("build.gradle") {
        let text = [read("pom.xml"), read("build.gradle")].concat().to_lowercase();
        return project(
            "Java",
            first_match(
                &text,
                &[("spring-boot-starter", "Spring Boot"), ("com.android", "Android")],
            ),
        );
    }

    let top_level = top_level_files(root);

    if let Some(csproj) = top_level.iter().find(|name| name.ends_with(".csproj")) {
        let text = read(csproj.as_str()).to_lowercase();
        return project(
            "C#",
            first_match(&text, &[("microsoft.aspnetcore", "ASP.NET Core")]),
        );
    }

    if has("go.mod") {
        let text = read("go.mod");
        return project(
            "Go",
            first_match(
                &text,
                &[
                    ("github.com/gin-gonic/gin", "Gin"),
                    ("github.com/labstack/echo", "Echo"),
                ],
            ),
        );
    }

    if has("Cargo.toml") {
        let text = read("Cargo.toml").to_lowercase();
        return project("Rust", first_match(&text, &[("rocket", "Rocket")]));
    }

    if has("package.json") {
        let framework = serde_json::from_str::<Value>(&read("package.json"))
            .ok()
            .and_then(|json| js_framework(&json));
        return project("JavaScript/TypeScript", framework);
    }

    let extensions: HashSet<&str> = top_level
        .iter()
        .filter_map(|name| name.rsplit_once('.').map(|(_, ext)| ext))
        .collect();

    let language = [
        ("py", "Python"),
        ("php", "PHP"),
        ("js", "JavaScript"),
        ("rb", "Ruby"),
        ("java", "Java"),
        ("cs", "C#"),
        ("go", "Go"),
        ("rs", "Rust"),
    ]
    .iter()
    .find(|(ext, _)| extensions.contains(ext))
    .map(|(_, language)| *language)
    .unwrap_or("Unknown");

    project(language, None)
}

fn project(language: &str, framework: Option<&str>) -> ProjectType {
    ProjectType {
        language: language.to_string(),
        framework: framework.map(String::from),
    }
}

fn first_match<'a>(text: &str, table: &[(&str, &'a str)]) -> Option<&'a str> {
    table
        .iter()
        .find(|(needle, _)| text.contains(needle))
        .map(|(_, framework)| *framework)
}

fn php_framework(manifest: &ComposerManifest) -> Option<String> {
    [
        ("laravel/framework", "Laravel"),
        ("symfony", "Symfony"),
        ("cakephp/cakephp", "CakePHP"),
        ("drupal/core", "Drupal"),
        ("magento/product-community-edition", "Magento"),
    ]
    .iter()
    .find(|(needle, _)| manifest.requires_like(needle))
    .map(|(_, framework)| framework.to_string())
}

fn js_framework(package_json: &Value) -> Option<&'static str> {
    let has_dep = |name: &str| {
        ["dependencies", "devDependencies"]
            .iter()
            .any(|section| package_json[section].get(name).is_some())
    };

    [
        ("react", "React"),
        ("next", "Next.js"),
        ("vue", "Vue.js"),
        ("@angular/core", "Angular"),
        ("svelte", "Svelte"),
        ("express", "Express"),
    ]
    .iter()
    .find(|(dep, _)| has_dep(dep))
    .map(|(_, framework)| *framework)
}

fn top_level_files(root: &Path) -> Vec<String> {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect()
}
