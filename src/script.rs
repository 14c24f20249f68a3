/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::Context;
use std::path::Path;

/// Line prefix that splits a script into fragments. Fragments of one script
/// run concurrently against the scratch database.
const FRAGMENT_MARK: &str = "## -";

/// Credential directives a safety script fragment starts with.
const ROOT_MARK: &str = "## root";
const APP_USER_MARK: &str = "## app_user";

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptItem {
    pub name: String,
    pub body: String,
}

/// Who a safety fragment runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    Root,
    AppUser,
}

/// Scripts compiled into the binary. User supplied scripts from the
/// configured directory are layered on top and shadow these by name.
static BUILTIN_SCRIPTS: &[(&str, &str)] = &[
    ("transactions", include_str!("templates/scripts/transactions.sql")),
    ("constraints", include_str!("templates/scripts/constraints.sql")),
    ("indexes", include_str!("templates/scripts/indexes.sql")),
    ("privileges", include_str!("templates/scripts/privileges.sql")),
];

pub fn builtin_scripts() -> Vec<ScriptItem> {
    BUILTIN_SCRIPTS
        .iter()
        .map(|(name, body)| ScriptItem {
            name: name.to_string(),
            body: body.to_string(),
        })
        .collect()
}

/// Loads every .sql file in a directory as a script named after its stem.
pub fn load_dir(dir: &Path) -> anyhow::Result<Vec<ScriptItem>> {
    let mut scripts = vec![];
    let entries = std::fs::read_dir(dir)
        .context(format!("Unable to read script directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("sql") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let body = std::fs::read_to_string(&path)
            .context(format!("Unable to read script {}", path.display()))?;
        scripts.push(ScriptItem {
            name: name.to_string(),
            body,
        });
    }
    scripts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(scripts)
}

/// The full catalog: user scripts first, builtins filling the gaps.
pub fn catalog(user_dir: Option<&Path>) -> anyhow::Result<Vec<ScriptItem>> {
    let mut scripts = match user_dir {
        Some(dir) => load_dir(dir)?,
        None => vec![],
    };
    for builtin in builtin_scripts() {
        if !scripts.iter().any(|script| script.name == builtin.name) {
            scripts.push(builtin);
        }
    }
    Ok(scripts)
}

pub fn find<'a>(scripts: &'a [ScriptItem], name: &str) -> Option<&'a ScriptItem> {
    scripts.iter().find(|script| script.name == name)
}

/// Splits a script body into fragments at marker lines. A body without
/// markers is a single fragment.
pub fn split_fragments(body: &str) -> Vec<String> {
    let mut fragments = vec![];
    let mut current = String::new();
    for line in body.lines() {
        if line.trim_start().starts_with(FRAGMENT_MARK) {
            if !current.trim().is_empty() {
                fragments.push(current.trim().to_string());
            }
            current = String::new();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        fragments.push(current.trim().to_string());
    }
    fragments
}

/// Splits a safety script into (credential, sql) fragments. Every fragment
/// must open with a credential directive.
pub fn split_safety_fragments(body: &str) -> anyhow::Result<Vec<(Credential, String)>> {
    let mut fragments = vec![];
    for fragment in split_fragments(body) {
        let (first, rest) = fragment
            .split_once('\n')
            .unwrap_or((fragment.as_str(), ""));
        let credential = match first.trim() {
            ROOT_MARK => Credential::Root,
            APP_USER_MARK => Credential::AppUser,
            other => {
                return Err(anyhow::anyhow!(
                    "Safety fragment must start with {} or {}, found {}",
                    ROOT_MARK,
                    APP_USER_MARK,
                    other
                ))
            }
        };
        fragments.push((credential, rest.trim().to_string()));
    }
    Ok(fragments)
}
