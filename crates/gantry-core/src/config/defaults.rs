//! Default values and well-known file names

/// Configuration file names searched for, in order of preference
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        "gantry.toml",
        "gantry.yaml",
        "gantry.yml",
        ".gantry.toml",
        ".gantry.yaml",
    ]
}

/// Directory name Gantry keeps its local state under, relative to the root
pub const STATE_DIR: &str = ".gantry";
