// SPDX-License-Identifier: MIT
//! Dependency-manifest parsers.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Package ecosystems the scanner understands, named as OSV expects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ecosystem {
    Npm,
    PyPi,
    Go,
}

impl Ecosystem {
    /// The ecosystem string used in OSV query payloads.
    pub fn as_osv(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::PyPi => "PyPI",
            Ecosystem::Go => "Go",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    /// Cleaned version: range operators and trailing qualifiers stripped.
    pub version: String,
    pub ecosystem: Ecosystem,
}

/// Dispatch on the manifest's basename. Unknown manifests yield nothing.
pub fn parse_manifest(path: &str, content: &str) -> Vec<Package> {
    let basename = path.rsplit('/').next().unwrap_or(path);
    let packages = match basename {
        "package.json" => parse_package_json(content),
        "requirements.txt" => parse_requirements_txt(content),
        "pyproject.toml" => parse_pyproject_toml(content),
        "go.mod" => parse_go_mod(content),
        _ => Vec::new(),
    };
    debug!(path, count = packages.len(), "parsed dependency manifest");
    packages
}

/// Strip leading non-digit characters, then keep digits and dots up to the
/// first character that is neither: `"^4.17.11"` → `"4.17.11"`,
/// `">=2.0,<3"` → `"2.0"`, `"1.2.3b1"` → `"1.2.3"`.
pub fn clean_version(raw: &str) -> String {
    let trimmed: &str = raw.trim();
    let start = trimmed
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let rest = &trimmed[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(rest.len());
    rest[..end].trim_end_matches('.').to_string()
}

fn parse_package_json(content: &str) -> Vec<Package> {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(content) else {
        return Vec::new();
    };
    let mut packages = Vec::new();
    for key in ["dependencies", "devDependencies"] {
        let Some(deps) = root.get(key).and_then(|v| v.as_object()) else {
            continue;
        };
        for (name, version) in deps {
            let Some(raw) = version.as_str() else { continue };
            let version = clean_version(raw);
            if version.is_empty() {
                continue; // "workspace:*", git urls, tags
            }
            packages.push(Package {
                name: name.clone(),
                version,
                ecosystem: Ecosystem::Npm,
            });
        }
    }
    packages
}

fn parse_requirements_txt(content: &str) -> Vec<Package> {
    let mut packages = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
            continue; // comments, -r includes, --flags
        }
        // Name ends at the first specifier/extras character.
        let name_end = line
            .find(|c: char| "=<>!~[; ".contains(c))
            .unwrap_or(line.len());
        let name = &line[..name_end];
        if name.is_empty() {
            continue;
        }
        let version = clean_version(&line[name_end..]);
        if version.is_empty() {
            continue; // unpinned
        }
        packages.push(Package {
            name: name.to_string(),
            version,
            ecosystem: Ecosystem::PyPi,
        });
    }
    packages
}

fn parse_pyproject_toml(content: &str) -> Vec<Package> {
    let Ok(root) = content.parse::<toml::Value>() else {
        return Vec::new();
    };
    let mut packages = Vec::new();

    // PEP 621: [project] dependencies = ["requests>=2.28", ...]
    if let Some(deps) = root
        .get("project")
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_array())
    {
        for dep in deps {
            let Some(spec) = dep.as_str() else { continue };
            let name_end = spec
                .find(|c: char| "=<>!~[; ".contains(c))
                .unwrap_or(spec.len());
            let name = spec[..name_end].trim();
            let version = clean_version(&spec[name_end..]);
            if !name.is_empty() && !version.is_empty() {
                packages.push(Package {
                    name: name.to_string(),
                    version,
                    ecosystem: Ecosystem::PyPi,
                });
            }
        }
    }

    // Poetry: [tool.poetry.dependencies] requests = "^2.28"
    if let Some(deps) = root
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_table())
    {
        for (name, value) in deps {
            if name == "python" {
                continue;
            }
            let raw = match value {
                toml::Value::String(s) => s.as_str(),
                toml::Value::Table(t) => t.get("version").and_then(|v| v.as_str()).unwrap_or(""),
                _ => "",
            };
            let version = clean_version(raw);
            if !version.is_empty() {
                packages.push(Package {
                    name: name.clone(),
                    version,
                    ecosystem: Ecosystem::PyPi,
                });
            }
        }
    }

    packages
}

fn parse_go_mod(content: &str) -> Vec<Package> {
    let mut packages = Vec::new();
    let mut in_require_block = false;

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with("require (") {
            in_require_block = true;
            continue;
        }
        if in_require_block && line.starts_with(')') {
            in_require_block = false;
            continue;
        }

        let spec = if let Some(rest) = line.strip_prefix("require ") {
            rest
        } else if in_require_block {
            line
        } else {
            continue;
        };

        let mut parts = spec.split_whitespace();
        let (Some(name), Some(version)) = (parts.next(), parts.next()) else {
            continue;
        };
        if name == "(" {
            continue;
        }
        let version = clean_version(version);
        if version.is_empty() {
            continue;
        }
        packages.push(Package {
            name: name.to_string(),
            version,
            ecosystem: Ecosystem::Go,
        });
    }
    packages
}
