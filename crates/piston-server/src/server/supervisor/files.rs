//! `eula.txt` and `server.properties`.

use crate::error::Result;
use chrono::Utc;
use std::path::Path;

pub const EULA_FILE: &str = "eula.txt";
pub const PROPERTIES_FILE: &str = "server.properties";

/// Whether `eula.txt` in `root` says `eula=true`.
pub fn eula_accepted(root: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(root.join(EULA_FILE)) else {
        return false;
    };
    content.lines().any(|line| {
        line.split_once('=')
            .map(|(k, v)| k.trim() == "eula" && v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    })
}

pub fn accept_eula(root: &Path) -> Result<()> {
    let content = format!(
        "#By changing the setting below to TRUE you are indicating your agreement to our EULA (https://aka.ms/MinecraftEULA).\n#{}\neula=true\n",
        Utc::now().format("%a %b %d %H:%M:%S UTC %Y")
    );
    std::fs::write(root.join(EULA_FILE), content)?;
    log::info!("[files] Accepted EULA in {:?}", root);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PropertyLine {
    Entry { key: String, value: String },
    Verbatim(String),
}

/// `server.properties` that keeps comments and key order across edits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerProperties {
    lines: Vec<PropertyLine>,
}

const DEFAULT_PROPERTIES: &[(&str, &str)] = &[
    ("allow-flight", "false"),
    ("difficulty", "normal"),
    ("enable-command-block", "false"),
    ("gamemode", "survival"),
    ("max-players", "20"),
    ("motd", "A Minecraft Server"),
    ("online-mode", "false"),
    ("pvp", "true"),
    ("server-port", "25565"),
    ("spawn-protection", "16"),
    ("view-distance", "10"),
    ("white-list", "false"),
];

impl ServerProperties {
    pub fn parse(content: &str) -> Self {
        let lines = content
            .lines()
            .map(|line| {
                let trimmed = line.trim_start();
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                    return PropertyLine::Verbatim(line.to_string());
                }
                match line.split_once('=') {
                    Some((k, v)) => PropertyLine::Entry {
                        key: k.trim().to_string(),
                        value: v.to_string(),
                    },
                    None => PropertyLine::Verbatim(line.to_string()),
                }
            })
            .collect();
        Self { lines }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    pub fn default_template() -> Self {
        let mut props = Self {
            lines: vec![PropertyLine::Verbatim(
                "#Minecraft server properties".to_string(),
            )],
        };
        for (key, value) in DEFAULT_PROPERTIES {
            props.set(key, value);
        }
        props
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            PropertyLine::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Replace the value in place, or append a new entry.
    pub fn set(&mut self, key: &str, value: &str) {
        for line in &mut self.lines {
            if let PropertyLine::Entry { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
        }
        self.lines.push(PropertyLine::Entry {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render())?;
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                PropertyLine::Entry { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(value);
                }
                PropertyLine::Verbatim(text) => out.push_str(text),
            }
            out.push('\n');
        }
        out
    }
}

/// Files a server needs before its first boot. Existing files are left alone.
pub fn ensure_first_run_files(root: &Path) -> Result<()> {
    if !eula_accepted(root) {
        accept_eula(root)?;
    }
    let properties = root.join(PROPERTIES_FILE);
    if !properties.exists() {
        ServerProperties::default_template().save(&properties)?;
        log::info!("[files] Wrote default {:?}", properties);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn edits_keep_comments_and_order() {
        let mut props = ServerProperties::parse("#comment\nmotd=Hi\nserver-port=25565\n\nlevel-seed=\n");
        props.set("server-port", "25570");
        props.set("max-players", "5");

        assert_eq!(props.get("server-port"), Some("25570"));
        assert_eq!(props.get("level-seed"), Some(""));
        assert_eq!(
            props.render(),
            "#comment\nmotd=Hi\nserver-port=25570\n\nlevel-seed=\nmax-players=5\n"
        );
    }

    #[test]
    fn first_run_files() {
        let tmp = tempdir().unwrap();
        assert!(!eula_accepted(tmp.path()));

        ensure_first_run_files(tmp.path()).unwrap();
        assert!(eula_accepted(tmp.path()));

        let props = ServerProperties::load(&tmp.path().join(PROPERTIES_FILE)).unwrap();
        assert_eq!(props.get("online-mode"), Some("false"));
        assert_eq!(props.get("difficulty"), Some("normal"));
        assert_eq!(props.get("server-port"), Some("25565"));
        assert_eq!(props.get("max-players"), Some("20"));
    }

    #[test]
    fn existing_properties_are_kept() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join(PROPERTIES_FILE), "server-port=30000\n").unwrap();
        std::fs::write(tmp.path().join(EULA_FILE), "eula=false\n").unwrap();

        ensure_first_run_files(tmp.path()).unwrap();
        assert!(eula_accepted(tmp.path()));
        assert_eq!(
            std::fs::read_to_string(tmp.path().join(PROPERTIES_FILE)).unwrap(),
            "server-port=30000\n"
        );
    }
}
