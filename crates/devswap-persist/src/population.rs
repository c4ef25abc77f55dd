//! Population init containers
//!
//! Each init container mounts the persist path's sub path at a fixed root,
//! copies the image's original contents into it, and only then records the
//! marker. A pod killed mid-copy leaves no marker, so the next pod copies
//! again; a pod that finds the marker never touches the volume.

use k8s_openapi::api::core::v1::{Container, VolumeMount};

use devswap_common::{PERSISTENCE_MOUNT_ROOT, PERSISTENCE_VOLUME_NAME, POPULATION_MARKER};

/// Init container that copies one persist path's image contents into the volume
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopulationInitContainer {
    /// Position of the persist path in the request
    pub index: usize,
    /// Image of the container whose path is persisted
    pub image: String,
    /// Source path inside that image
    pub source_path: String,
    /// Sub path on the persistence volume
    pub sub_path: String,
}

impl PopulationInitContainer {
    /// Container name, `path-{index}-init`
    pub fn name(&self) -> String {
        format!("path-{}-init", self.index)
    }

    /// Shell step: copy then mark, skipped entirely once marked
    pub fn script(&self) -> String {
        let source = shell_quote(&clean_path(&self.source_path));
        format!(
            "if [ ! -d \"{root}/{marker}/\" ]; then cp -a {source}/. {root}/ && mkdir {root}/{marker} ; fi",
            root = PERSISTENCE_MOUNT_ROOT,
            marker = POPULATION_MARKER,
            source = source,
        )
    }

    /// Render the Kubernetes container
    pub fn to_container(&self) -> Container {
        Container {
            name: self.name(),
            image: Some(self.image.clone()),
            command: Some(vec!["sh".to_string()]),
            args: Some(vec!["-c".to_string(), self.script()]),
            volume_mounts: Some(vec![VolumeMount {
                name: PERSISTENCE_VOLUME_NAME.to_string(),
                mount_path: PERSISTENCE_MOUNT_ROOT.to_string(),
                sub_path: Some(self.sub_path.clone()),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }
}

/// Lexically clean a slash-separated path.
///
/// Collapses repeated separators, drops `.` segments, resolves `..` against
/// the preceding segment, and never climbs above the root of an absolute path.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }

    let joined = parts.join("/");
    if rooted {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Single-quote a word for `sh` unless it is made only of safe characters
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_for(path: &str) -> PopulationInitContainer {
        PopulationInitContainer {
            index: 0,
            image: "node:20".to_string(),
            source_path: path.to_string(),
            sub_path: "path-0".to_string(),
        }
    }

    #[test]
    fn script_checks_marker_copies_then_marks() {
        assert_eq!(
            init_for("/data").script(),
            "if [ ! -d \"/devspace-persistence/.devspace/\" ]; then cp -a /data/. /devspace-persistence/ && mkdir /devspace-persistence/.devspace ; fi"
        );
    }

    #[test]
    fn marker_is_written_after_copy() {
        let script = init_for("/data").script();
        let copy = script.find("cp -a").expect("copy step");
        let mark = script.find("mkdir").expect("mark step");
        assert!(copy < mark);
        // copy failure short-circuits the marker
        assert!(script[copy..mark].contains("&&"));
    }

    #[test]
    fn script_uses_cleaned_source() {
        let script = init_for("/var//lib/./app/").script();
        assert!(script.contains("cp -a /var/lib/app/. "));
    }

    #[test]
    fn script_quotes_unsafe_paths() {
        let script = init_for("/srv/my data").script();
        assert!(script.contains("cp -a '/srv/my data'/. "));

        let script = init_for("/srv/it's").script();
        assert!(script.contains(r"cp -a '/srv/it'\''s'/. "));
    }

    #[test]
    fn container_mounts_volume_at_fixed_root() {
        let init = PopulationInitContainer {
            index: 3,
            image: "postgres:16".to_string(),
            source_path: "/var/lib/postgresql/data".to_string(),
            sub_path: "db".to_string(),
        };
        let c = init.to_container();
        assert_eq!(c.name, "path-3-init");
        assert_eq!(c.image.as_deref(), Some("postgres:16"));
        assert_eq!(c.command, Some(vec!["sh".to_string()]));
        let args = c.args.expect("args");
        assert_eq!(args[0], "-c");
        assert!(args[1].contains("/var/lib/postgresql/data"));

        let mounts = c.volume_mounts.expect("mounts");
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].name, "devspace-persistence");
        assert_eq!(mounts[0].mount_path, "/devspace-persistence");
        assert_eq!(mounts[0].sub_path.as_deref(), Some("db"));
        assert_eq!(mounts[0].read_only, None);
    }

    #[test]
    fn clean_path_cases() {
        assert_eq!(clean_path(""), ".");
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("/data/"), "/data");
        assert_eq!(clean_path("//a//b"), "/a/b");
        assert_eq!(clean_path("/a/./b/../c"), "/a/c");
        assert_eq!(clean_path("/../a"), "/a");
        assert_eq!(clean_path("a/../../b"), "../b");
        assert_eq!(clean_path("./"), ".");
    }
}
