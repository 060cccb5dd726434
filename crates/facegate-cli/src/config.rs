use std::path::PathBuf;

/// Gate configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for the database and stored images.
    pub data_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Snapshots taken on denied attempts.
    pub incident_dir: PathBuf,
    /// Enrollment photos.
    pub faces_dir: PathBuf,
    /// Administrator password. Admin commands are refused while unset.
    pub admin_password: Option<String>,
    /// Default number of rows printed by `logs`.
    pub log_limit: usize,
    /// SCRFD score floor for a detection to count as a face.
    pub detection_threshold: f32,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("FACEGATE_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("facegate")
        });

        let path_or = |key: &str, default: &str| var(key).map(PathBuf::from).unwrap_or_else(|| data_dir.join(default));

        Self {
            db_path: path_or("FACEGATE_DB_PATH", "facegate.db"),
            model_dir: path_or("FACEGATE_MODEL_DIR", "models"),
            incident_dir: path_or("FACEGATE_INCIDENT_DIR", "incidents"),
            faces_dir: path_or("FACEGATE_FACES_DIR", "faces"),
            admin_password: var("FACEGATE_ADMIN_PASSWORD").filter(|p| !p.is_empty()),
            log_limit: parsed(&var, "FACEGATE_LOG_LIMIT", 50),
            detection_threshold: parsed(&var, "FACEGATE_DETECTION_THRESHOLD", 0.5),
            data_dir,
        }
    }

    pub fn model_present(&self, file: &str) -> bool {
        self.model_dir.join(file).is_file()
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults_under_xdg_data_home() {
        let cfg = load(&[("XDG_DATA_HOME", "/var/lib")]);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/facegate"));
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/facegate/facegate.db"));
        assert_eq!(cfg.model_dir, PathBuf::from("/var/lib/facegate/models"));
        assert_eq!(cfg.incident_dir, PathBuf::from("/var/lib/facegate/incidents"));
        assert_eq!(cfg.faces_dir, PathBuf::from("/var/lib/facegate/faces"));
        assert_eq!(cfg.admin_password, None);
        assert_eq!(cfg.log_limit, 50);
        assert!((cfg.detection_threshold - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_home_fallback() {
        let cfg = load(&[("HOME", "/home/gate")]);
        assert_eq!(cfg.data_dir, PathBuf::from("/home/gate/.local/share/facegate"));
    }

    #[test]
    fn test_overrides() {
        let cfg = load(&[
            ("FACEGATE_DATA_DIR", "/srv/gate"),
            ("FACEGATE_DB_PATH", "/tmp/other.db"),
            ("FACEGATE_ADMIN_PASSWORD", "hunter2"),
            ("FACEGATE_LOG_LIMIT", "10"),
            ("FACEGATE_DETECTION_THRESHOLD", "0.7"),
        ]);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(cfg.faces_dir, PathBuf::from("/srv/gate/faces"));
        assert_eq!(cfg.admin_password.as_deref(), Some("hunter2"));
        assert_eq!(cfg.log_limit, 10);
        assert!((cfg.detection_threshold - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let cfg = load(&[("FACEGATE_LOG_LIMIT", "lots"), ("FACEGATE_ADMIN_PASSWORD", "")]);
        assert_eq!(cfg.log_limit, 50);
        assert_eq!(cfg.admin_password, None);
    }
}
