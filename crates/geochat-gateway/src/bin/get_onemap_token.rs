//! OneMap token fetcher: exchanges account credentials for an API token and
//! writes `ONEMAP_TOKEN` into `.env` for the gateway to pick up.
//!
//! Credentials come from `ONEMAP_LOGIN_EMAIL` / `ONEMAP_LOGIN_PW` (process
//! env or `.env`), with an interactive prompt as the last resort. Existing
//! `.env` entries are preserved; only `ONEMAP_TOKEN` is added or replaced.

use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

const AUTH_URL: &str = "https://www.onemap.gov.sg/api/auth/post/getToken";
const ENV_PATH: &str = ".env";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    println!("OneMap token fetcher (writes ONEMAP_TOKEN to {ENV_PATH})");

    let email = env_or_prompt("ONEMAP_LOGIN_EMAIL", "Email: ");
    let password = env_or_prompt("ONEMAP_LOGIN_PW", "Password: ");

    let response = reqwest::Client::new()
        .post(AUTH_URL)
        .timeout(Duration::from_secs(15))
        .json(&serde_json::json!({ "email": email, "password": password }))
        .send()
        .await;

    let data: Value = match response {
        Ok(res) if res.status().is_success() => match res.json().await {
            Ok(data) => data,
            Err(e) => {
                eprintln!("Request failed: {e}");
                std::process::exit(1);
            }
        },
        Ok(res) => {
            eprintln!("Request failed: status {}", res.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Request failed: {e}");
            std::process::exit(1);
        }
    };

    let token = match extract_token(&data) {
        Some(token) => token,
        None => {
            eprintln!(
                "No token found in response:\n{}",
                serde_json::to_string_pretty(&data).unwrap_or_default()
            );
            std::process::exit(1);
        }
    };

    let path = Path::new(ENV_PATH);
    let existing = std::fs::read_to_string(path).unwrap_or_default();
    let updated = upsert_env_var(&existing, "ONEMAP_TOKEN", &token);
    if let Err(e) = std::fs::write(path, updated) {
        eprintln!("Failed to write {ENV_PATH}: {e}");
        std::process::exit(1);
    }
    println!("Wrote ONEMAP_TOKEN to {ENV_PATH}");
}

fn env_or_prompt(var: &str, prompt: &str) -> String {
    if let Ok(value) = std::env::var(var) {
        let value = value.trim().to_string();
        if !value.is_empty() {
            return value;
        }
    }
    print!("{prompt}");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok();
    line.trim().to_string()
}

/// The auth endpoint has shipped the token under different keys over time.
fn extract_token(data: &Value) -> Option<String> {
    ["access_token", "accessToken", "token"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// Replaces the `key=` line in dotenv-style contents, or appends one,
/// leaving every other line (comments included) untouched.
fn upsert_env_var(contents: &str, key: &str, value: &str) -> String {
    let mut lines = Vec::new();
    let mut replaced = false;
    for line in contents.lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            if let Some((k, _)) = line.split_once('=') {
                if k.trim() == key {
                    lines.push(format!("{key}={value}"));
                    replaced = true;
                    continue;
                }
            }
        }
        lines.push(line.to_string());
    }
    if !replaced {
        lines.push(format!("{key}={value}"));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_extraction_tries_known_keys_in_order() {
        assert_eq!(
            extract_token(&json!({ "access_token": "abc" })).as_deref(),
            Some("abc")
        );
        assert_eq!(
            extract_token(&json!({ "accessToken": "def" })).as_deref(),
            Some("def")
        );
        assert_eq!(
            extract_token(&json!({ "token": "ghi" })).as_deref(),
            Some("ghi")
        );
        assert!(extract_token(&json!({ "access_token": "" })).is_none());
        assert!(extract_token(&json!({ "error": "bad credentials" })).is_none());
    }

    #[test]
    fn upsert_replaces_existing_token_and_keeps_other_lines() {
        let contents = "# local config\nONEMAP_LOGIN_EMAIL=me@example.com\nONEMAP_TOKEN=old\n";
        let updated = upsert_env_var(contents, "ONEMAP_TOKEN", "new");
        assert_eq!(
            updated,
            "# local config\nONEMAP_LOGIN_EMAIL=me@example.com\nONEMAP_TOKEN=new\n"
        );
    }

    #[test]
    fn upsert_appends_when_token_is_absent() {
        let updated = upsert_env_var("", "ONEMAP_TOKEN", "t1");
        assert_eq!(updated, "ONEMAP_TOKEN=t1\n");
        let updated = upsert_env_var("A=1\n", "ONEMAP_TOKEN", "t1");
        assert_eq!(updated, "A=1\nONEMAP_TOKEN=t1\n");
    }
}
