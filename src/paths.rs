use directories::BaseDirs;
use serde::Serialize;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

pub const STEAM_APP_ID: &str = "8500";
pub const DEFAULT_PROFILE: &str = "Default";
const PROFILE_PREFIX: &str = "settings_";
const PROTON_EVE_DIR: &str = "pfx/drive_c/users/steamuser/AppData/Local/CCP/EVE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Windows,
    Proton,
    Wine,
    Custom,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Proton => "proton",
            Platform::Wine => "wine",
            Platform::Custom => "custom",
        }
    }
}

/// One concrete `settings_<profile>` folder for one server of one install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsRoot {
    pub platform: Platform,
    pub server: String,
    pub profile: String,
    pub path: PathBuf,
    pub exists: bool,
}

impl SettingsRoot {
    /// `platform:server/profile`; the platform keeps a Proton and a Wine
    /// install of the same server apart.
    pub fn label(&self) -> String {
        format!("{}:{}/{}", self.platform.as_str(), self.server, self.profile)
    }
}

/// Probes the well-known EVE settings locations. Environment lookups happen
/// once in [`PathDetector::from_env`]; `detect` only reads the filesystem.
#[derive(Debug, Clone, Default)]
pub struct PathDetector {
    home: Option<PathBuf>,
    user: Option<String>,
    local_app_data: Option<PathBuf>,
    custom_paths: Vec<PathBuf>,
}

impl PathDetector {
    pub fn from_env(custom_paths: &[PathBuf]) -> Self {
        let base = BaseDirs::new();
        let home = base.as_ref().map(|dirs| dirs.home_dir().to_path_buf());
        let local_app_data = if cfg!(windows) {
            base.as_ref().map(|dirs| dirs.data_local_dir().to_path_buf())
        } else {
            None
        };
        let user = std::env::var("USERNAME")
            .or_else(|_| std::env::var("USER"))
            .ok()
            .filter(|value| !value.trim().is_empty());

        Self {
            home,
            user,
            local_app_data,
            custom_paths: custom_paths.to_vec(),
        }
    }

    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: Some(home.into()),
            ..Self::default()
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn local_app_data(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_app_data = Some(path.into());
        self
    }

    pub fn custom_paths(mut self, paths: &[PathBuf]) -> Self {
        self.custom_paths = paths.to_vec();
        self
    }

    /// Base directories in fixed probe order. Each one is a `CCP/EVE` folder,
    /// except custom entries which may also be a server or profile folder.
    pub fn candidate_bases(&self) -> Vec<(Platform, PathBuf)> {
        let mut candidates = Vec::new();

        if let Some(local) = &self.local_app_data {
            candidates.push((Platform::Windows, local.join("CCP").join("EVE")));
        }

        if let Some(home) = &self.home {
            for library in steam_libraries(home) {
                candidates.push((
                    Platform::Proton,
                    library
                        .join("steamapps/compatdata")
                        .join(STEAM_APP_ID)
                        .join(PROTON_EVE_DIR),
                ));
            }

            if let Some(user) = &self.user {
                candidates.push((
                    Platform::Wine,
                    home.join(".eve/wineenv/drive_c/users")
                        .join(user)
                        .join("Local Settings/Application Data/CCP/EVE"),
                ));
                candidates.push((
                    Platform::Wine,
                    home.join(".wine/drive_c/users")
                        .join(user)
                        .join("AppData/Local/CCP/EVE"),
                ));
            }
        }

        for path in &self.custom_paths {
            candidates.push((Platform::Custom, path.clone()));
        }

        candidates
    }

    pub fn detect(&self) -> Vec<SettingsRoot> {
        let mut seen_bases = HashSet::new();
        let mut seen_roots = HashSet::new();
        let mut roots = Vec::new();

        for (platform, base) in self.candidate_bases() {
            if !base.is_dir() {
                debug!(platform = platform.as_str(), path = %base.display(), "settings base not present");
                continue;
            }
            if !seen_bases.insert(canonical(&base)) {
                continue;
            }

            let found = match platform {
                Platform::Custom => custom_roots(&base),
                _ => base_roots(platform, &base),
            };
            for root in found {
                if seen_roots.insert(canonical(&root.path)) {
                    roots.push(root);
                }
            }
        }

        debug!(roots = roots.len(), "settings root detection finished");
        roots
    }
}

fn base_roots(platform: Platform, base: &Path) -> Vec<SettingsRoot> {
    let mut roots = Vec::new();
    for server_dir in server_folders(base) {
        let server = server_name(&server_dir);
        roots.extend(profile_roots(platform, &server, &server_dir));
    }
    roots
}

fn custom_roots(path: &Path) -> Vec<SettingsRoot> {
    if let Some(profile) = profile_name(path) {
        let server = path
            .parent()
            .map(server_name)
            .unwrap_or_else(|| "custom".to_string());
        return vec![SettingsRoot {
            platform: Platform::Custom,
            server,
            profile,
            path: path.to_path_buf(),
            exists: true,
        }];
    }

    if !server_folders(path).is_empty() {
        return base_roots(Platform::Custom, path);
    }

    let server = server_name(path);
    profile_roots(Platform::Custom, &server, path)
}

/// `settings_Default` first (even when absent), then the other profiles by name.
fn profile_roots(platform: Platform, server: &str, server_dir: &Path) -> Vec<SettingsRoot> {
    let default_dir = server_dir.join(format!("{PROFILE_PREFIX}{DEFAULT_PROFILE}"));
    let mut roots = vec![SettingsRoot {
        platform,
        server: server.to_string(),
        profile: DEFAULT_PROFILE.to_string(),
        exists: default_dir.is_dir(),
        path: default_dir,
    }];

    let entries = match fs::read_dir(server_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %server_dir.display(), error = %err, "cannot list server folder");
            return roots;
        }
    };

    let mut profiles: Vec<(String, PathBuf)> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter_map(|path| profile_name(&path).map(|name| (name, path)))
        .filter(|(name, _)| name != DEFAULT_PROFILE)
        .collect();
    profiles.sort();

    for (profile, path) in profiles {
        roots.push(SettingsRoot {
            platform,
            server: server.to_string(),
            profile,
            path,
            exists: true,
        });
    }

    roots
}

fn server_folders(base: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(base) else {
        return Vec::new();
    };
    let mut folders: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(looks_like_server_folder)
                .unwrap_or(false)
        })
        .collect();
    folders.sort();
    folders
}

pub fn looks_like_server_folder(name: &str) -> bool {
    name.starts_with("c_")
        && name.contains("eve")
        && name.rsplit('_').next().is_some_and(|last| !last.is_empty())
}

/// `c_ccp_eve_tq_tranquility` -> `tranquility`; other folders keep their name.
pub fn server_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    if looks_like_server_folder(&name) {
        if let Some(last) = name.rsplit('_').next() {
            return last.to_string();
        }
    }
    if name.is_empty() {
        "custom".to_string()
    } else {
        name
    }
}

fn profile_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let profile = name.strip_prefix(PROFILE_PREFIX)?;
    if profile.is_empty() {
        return None;
    }
    Some(profile.to_string())
}

fn steam_libraries(home: &Path) -> Vec<PathBuf> {
    let mut libraries = Vec::new();
    for base in [home.join(".steam/steam"), home.join(".local/share/Steam")] {
        let vdf = base.join("steamapps/libraryfolders.vdf");
        if vdf.exists() {
            match fs::read_to_string(&vdf) {
                Ok(raw) => libraries.extend(parse_steam_library_paths(&raw)),
                Err(err) => warn!(path = %vdf.display(), error = %err, "cannot read Steam library list"),
            }
        }
        libraries.push(base);
    }

    let mut seen = HashSet::new();
    libraries.retain(|path| seen.insert(path.clone()));
    libraries
}

fn parse_steam_library_paths(raw: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if !line.contains("\"path\"") {
            continue;
        }

        let parts: Vec<&str> = line.split('"').collect();
        if parts.len() >= 4 {
            let path = parts[3].replace("\\\\", "\\");
            paths.push(PathBuf::from(path));
        }
    }
    paths
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
