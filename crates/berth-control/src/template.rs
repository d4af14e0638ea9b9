//! Pure template rendering for container specs and proxy vhosts.
//!
//! Rendering is deterministic and touches neither the filesystem nor the
//! network: callers supply the template and a variable map, and get a fully
//! substituted document back. A placeholder with no supplied value is an
//! error naming the placeholder; supplied values with no matching
//! placeholder are ignored, so callers can pass a superset.

use std::collections::BTreeMap;

use crate::error::{ControlError, ControlResult};
use crate::types::RuntimeKind;

/// Variable map consumed by [`render`].
pub type Vars = BTreeMap<String, String>;

/// Substitute `{{NAME}}` placeholders in `template` from `vars`.
pub fn render(template: &str, vars: &Vars) -> ControlResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("}}") else {
            // Unterminated marker: keep it literally.
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let name = &after[..end];
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => return Err(ControlError::MissingVariable(name.to_owned())),
        }

        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Select the compose template for a runtime/boilerplate pair.
#[must_use]
pub fn compose_template(runtime: RuntimeKind, boilerplate: &str) -> &'static str {
    match runtime {
        RuntimeKind::Php if boilerplate == "wordpress" => COMPOSE_WORDPRESS,
        RuntimeKind::Php => COMPOSE_PHP,
        RuntimeKind::Python => COMPOSE_PYTHON,
        RuntimeKind::Node => COMPOSE_NODE,
    }
}

/// Container image for a runtime/boilerplate pair. WordPress ships its own
/// application image; everything else uses the runtime's base image.
#[must_use]
pub fn image_for(runtime: RuntimeKind, boilerplate: &str) -> &'static str {
    match runtime {
        RuntimeKind::Php if boilerplate == "wordpress" => "wordpress:6-php8.2-apache",
        other => other.image(),
    }
}

/// Nginx upstream block name for a hostname (dots are not valid there).
#[must_use]
pub fn upstream_name(hostname: &str) -> String {
    hostname.replace('.', "_")
}

/// Compose template for Node.js sites.
pub const COMPOSE_NODE: &str = r#"services:
  app:
    image: {{DOCKER_IMAGE}}
    container_name: {{CONTAINER_NAME}}
    working_dir: /app
    command: sh -c "npm install --omit=dev && node server.js"
    environment:
      - PORT={{CONTAINER_PORT}}
    volumes:
      - {{SITE_DIR}}:/app
    ports:
      - "127.0.0.1:{{UPSTREAM_PORT}}:{{CONTAINER_PORT}}"
    restart: unless-stopped
"#;

/// Compose template for Python sites.
pub const COMPOSE_PYTHON: &str = r#"services:
  app:
    image: {{DOCKER_IMAGE}}
    container_name: {{CONTAINER_NAME}}
    working_dir: /app
    command: sh -c "pip install --no-cache-dir -r requirements.txt && python app.py"
    environment:
      - PORT={{CONTAINER_PORT}}
    volumes:
      - {{SITE_DIR}}:/app
    ports:
      - "127.0.0.1:{{UPSTREAM_PORT}}:{{CONTAINER_PORT}}"
    restart: unless-stopped
"#;

/// Compose template for plain PHP sites.
pub const COMPOSE_PHP: &str = r#"services:
  app:
    image: {{DOCKER_IMAGE}}
    container_name: {{CONTAINER_NAME}}
    volumes:
      - {{SITE_DIR}}:/var/www/html
    ports:
      - "127.0.0.1:{{UPSTREAM_PORT}}:{{CONTAINER_PORT}}"
    restart: unless-stopped
"#;

/// Compose template for the WordPress boilerplate (app + database).
pub const COMPOSE_WORDPRESS: &str = r#"services:
  app:
    image: {{DOCKER_IMAGE}}
    container_name: {{CONTAINER_NAME}}
    environment:
      WORDPRESS_DB_HOST: db
      WORDPRESS_DB_NAME: "{{DB_NAME}}"
      WORDPRESS_DB_USER: "{{DB_USER}}"
      WORDPRESS_DB_PASSWORD: "{{DB_PASSWORD}}"
    volumes:
      - {{SITE_DIR}}:/var/www/html
    ports:
      - "127.0.0.1:{{UPSTREAM_PORT}}:{{CONTAINER_PORT}}"
    restart: unless-stopped
    depends_on:
      - db
  db:
    image: mariadb:10.11
    environment:
      MARIADB_DATABASE: "{{DB_NAME}}"
      MARIADB_USER: "{{DB_USER}}"
      MARIADB_PASSWORD: "{{DB_PASSWORD}}"
      MARIADB_RANDOM_ROOT_PASSWORD: "1"
    restart: unless-stopped
"#;

/// Vhost template routing a hostname to its upstream port.
pub const VHOST: &str = r#"upstream {{UPSTREAM_NAME}} {
    server 127.0.0.1:{{UPSTREAM_PORT}};
    keepalive 64;
}

server {
    listen 80;
    listen [::]:80;
    server_name {{DOMAIN}} www.{{DOMAIN}};
    root {{SITE_DIR}};

    location /.well-known/acme-challenge/ {
        allow all;
    }

    location / {
        proxy_pass http://{{UPSTREAM_NAME}};
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_set_header Connection "";
        proxy_buffering off;
    }

    location ~ /\. {
        deny all;
        access_log off;
        log_not_found off;
    }

    access_log /var/log/nginx/{{DOMAIN}}.access.log;
    error_log /var/log/nginx/{{DOMAIN}}.error.log;
}
"#;
