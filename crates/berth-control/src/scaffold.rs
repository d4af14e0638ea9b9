//! Starter application scaffolding.
//!
//! A freshly created site gets a minimal runnable app so the health gate
//! has something to probe before the customer uploads code. WordPress
//! needs no scaffold; its container image ships the application.

use std::path::Path;

use tracing::{debug, info};

use crate::error::ControlResult;
use crate::template::{Vars, render};
use crate::types::RuntimeKind;

const NODE_PACKAGE_JSON: &str = r#"{
  "name": "{{PACKAGE_NAME}}",
  "version": "1.0.0",
  "private": true,
  "main": "server.js",
  "scripts": {
    "start": "node server.js"
  },
  "dependencies": {
    "express": "^4.18.0"
  }
}
"#;

const NODE_SERVER_JS: &str = r#"const express = require('express');
const path = require('path');
const app = express();
const port = process.env.PORT || 3000;

app.use(express.static(__dirname));

app.get('/', (req, res) => {
  res.sendFile(path.join(__dirname, 'index.html'));
});

app.get('/health', (req, res) => {
  res.json({ status: 'healthy', domain: '{{DOMAIN}}' });
});

app.listen(port, '0.0.0.0', () => {
  console.log(`{{DOMAIN}} listening on ${port}`);
});
"#;

const NODE_INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <title>{{DOMAIN}}</title>
</head>
<body>
  <h1>{{DOMAIN}}</h1>
  <p>Your Node.js site is live. Replace the contents of this directory to deploy your app.</p>
</body>
</html>
"#;

const PYTHON_APP_PY: &str = r#"import os

from flask import Flask, jsonify

app = Flask(__name__)


@app.route('/')
def home():
    return '<h1>{{DOMAIN}}</h1><p>Your Python site is live.</p>'


@app.route('/health')
def health():
    return jsonify(status='healthy', domain='{{DOMAIN}}')


if __name__ == '__main__':
    app.run(host='0.0.0.0', port=int(os.environ.get('PORT', 3000)))
"#;

const PYTHON_REQUIREMENTS: &str = "Flask==2.3.0\n";

const PHP_INDEX: &str = r#"<?php header('Content-Type: text/html'); ?>
<!DOCTYPE html>
<html>
<head><title>{{DOMAIN}}</title></head>
<body>
  <h1>{{DOMAIN}}</h1>
  <p>Your PHP site is live (PHP <?php echo phpversion(); ?>).</p>
</body>
</html>
"#;

/// Write starter files for a site into `data_dir`.
///
/// Skips sites that already have content unless `force` is set (a
/// migration regenerating boilerplate passes `force`). Returns whether
/// anything was written.
pub async fn scaffold_site(
    data_dir: &Path,
    hostname: &str,
    runtime: RuntimeKind,
    boilerplate: &str,
    force: bool,
) -> ControlResult<bool> {
    if runtime == RuntimeKind::Php && boilerplate == "wordpress" {
        debug!(hostname = %hostname, "wordpress boilerplate needs no scaffold");
        return Ok(false);
    }

    tokio::fs::create_dir_all(data_dir).await?;

    if !force && !dir_is_empty(data_dir).await? {
        debug!(hostname = %hostname, "site directory not empty, keeping existing code");
        return Ok(false);
    }

    let mut vars = Vars::new();
    vars.insert("DOMAIN".to_owned(), hostname.to_owned());
    vars.insert("PACKAGE_NAME".to_owned(), hostname.replace('.', "-"));

    let files: &[(&str, &str)] = match runtime {
        RuntimeKind::Node => &[
            ("package.json", NODE_PACKAGE_JSON),
            ("server.js", NODE_SERVER_JS),
            ("index.html", NODE_INDEX_HTML),
        ],
        RuntimeKind::Python => &[
            ("app.py", PYTHON_APP_PY),
            ("requirements.txt", PYTHON_REQUIREMENTS),
        ],
        RuntimeKind::Php => &[("index.php", PHP_INDEX)],
    };

    for (name, template) in files {
        let contents = render(template, &vars)?;
        tokio::fs::write(data_dir.join(name), contents).await?;
    }

    info!(hostname = %hostname, runtime = %runtime, "scaffolded starter app");
    Ok(true)
}

async fn dir_is_empty(dir: &Path) -> ControlResult<bool> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    Ok(entries.next_entry().await?.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn node_scaffold_writes_starter_files() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");

        let written = scaffold_site(&data_dir, "example.com", RuntimeKind::Node, "blank", false)
            .await
            .unwrap();
        assert!(written);

        let server = std::fs::read_to_string(data_dir.join("server.js")).unwrap();
        assert!(server.contains("example.com"));
        assert!(!server.contains("{{"));
        assert!(data_dir.join("package.json").exists());
        assert!(data_dir.join("index.html").exists());
    }

    #[tokio::test]
    async fn existing_content_is_preserved() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(data_dir.join("index.php"), "customer code").unwrap();

        let written = scaffold_site(&data_dir, "example.com", RuntimeKind::Php, "blank", false)
            .await
            .unwrap();
        assert!(!written);
        assert_eq!(
            std::fs::read_to_string(data_dir.join("index.php")).unwrap(),
            "customer code"
        );
    }

    #[tokio::test]
    async fn force_regenerates_over_existing_content() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(data_dir.join("index.php"), "old boilerplate").unwrap();

        let written = scaffold_site(&data_dir, "example.com", RuntimeKind::Php, "blank", true)
            .await
            .unwrap();
        assert!(written);

        let index = std::fs::read_to_string(data_dir.join("index.php")).unwrap();
        assert!(index.contains("example.com"));
    }

    #[tokio::test]
    async fn wordpress_is_not_scaffolded() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");

        let written = scaffold_site(
            &data_dir,
            "example.com",
            RuntimeKind::Php,
            "wordpress",
            false,
        )
        .await
        .unwrap();
        assert!(!written);
    }
}
