//! Compression planning and the tar archive/compress stage.

mod tar;

pub use tar::TarCompressor;
pub(crate) use tar::tar_args;

use crate::errors::ConfigError;

/// The resolved compression choice for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionPlan {
    /// Canonical kind name.
    pub kind: &'static str,
    /// Artifact file extension, including the leading dot.
    pub extension: &'static str,
    /// Preferred multi-threaded compress program, used when found on `PATH`.
    pub parallel_program: Option<&'static str>,
}

impl CompressionPlan {
    const fn new(kind: &'static str, extension: &'static str, parallel_program: Option<&'static str>) -> Self {
        Self {
            kind,
            extension,
            parallel_program,
        }
    }

    /// Whether the plan only archives without compressing.
    #[must_use]
    pub fn is_archive_only(&self) -> bool {
        self.extension == ".tar"
    }
}

/// Maps declared compression kinds to a [`CompressionPlan`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionPlanner;

impl CompressionPlanner {
    /// Resolves a declared kind.
    ///
    /// The empty string means archive-only. Unknown kinds are a
    /// configuration error.
    pub fn plan(kind: &str) -> Result<CompressionPlan, ConfigError> {
        let plan = match kind {
            "gz" | "tgz" | "taz" | "tar.gz" => CompressionPlan::new("gz", ".tar.gz", Some("pigz")),
            "Z" | "taZ" | "tar.Z" => CompressionPlan::new("Z", ".tar.Z", None),
            "bz2" | "tbz" | "tbz2" | "tar.bz2" => {
                CompressionPlan::new("bz2", ".tar.bz2", Some("pbzip2"))
            }
            "lz" | "tar.lz" => CompressionPlan::new("lz", ".tar.lz", None),
            "lzma" | "tlz" | "tar.lzma" => CompressionPlan::new("lzma", ".tar.lzma", None),
            "lzo" | "tar.lzo" => CompressionPlan::new("lzo", ".tar.lzo", None),
            "xz" | "txz" | "tar.xz" => CompressionPlan::new("xz", ".tar.xz", Some("pixz")),
            "zst" | "tzst" | "tar.zst" => CompressionPlan::new("zst", ".tar.zst", None),
            "tar" | "" => CompressionPlan::new("tar", ".tar", None),
            other => {
                return Err(ConfigError::new(format!("Unsupported compress type: {other}")));
            }
        };

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_extensions() {
        let cases = [
            (&["gz", "tgz", "taz", "tar.gz"][..], ".tar.gz"),
            (&["Z", "taZ", "tar.Z"][..], ".tar.Z"),
            (&["bz2", "tbz", "tbz2", "tar.bz2"][..], ".tar.bz2"),
            (&["lz", "tar.lz"][..], ".tar.lz"),
            (&["lzma", "tlz", "tar.lzma"][..], ".tar.lzma"),
            (&["lzo", "tar.lzo"][..], ".tar.lzo"),
            (&["xz", "txz", "tar.xz"][..], ".tar.xz"),
            (&["zst", "tzst", "tar.zst"][..], ".tar.zst"),
            (&["tar", ""][..], ".tar"),
        ];

        for (aliases, extension) in cases {
            for alias in aliases {
                let plan = CompressionPlanner::plan(alias).unwrap();
                assert_eq!(plan.extension, extension, "alias {alias}");
            }
        }
    }

    #[test]
    fn test_plan_parallel_programs() {
        assert_eq!(CompressionPlanner::plan("tgz").unwrap().parallel_program, Some("pigz"));
        assert_eq!(CompressionPlanner::plan("tbz2").unwrap().parallel_program, Some("pbzip2"));
        assert_eq!(CompressionPlanner::plan("txz").unwrap().parallel_program, Some("pixz"));

        for kind in ["Z", "lz", "lzma", "lzo", "zst", "tar", ""] {
            assert_eq!(CompressionPlanner::plan(kind).unwrap().parallel_program, None, "kind {kind}");
        }
    }

    #[test]
    fn test_empty_kind_is_archive_only() {
        let plan = CompressionPlanner::plan("").unwrap();
        assert_eq!(plan.kind, "tar");
        assert!(plan.is_archive_only());
        assert!(!CompressionPlanner::plan("gz").unwrap().is_archive_only());
    }

    #[test]
    fn test_unknown_kind_is_config_error() {
        for kind in ["rar", "zip", "GZ", "tar.gz2", " gz"] {
            let err = CompressionPlanner::plan(kind).unwrap_err();
            assert!(err.message.contains(kind), "{}", err.message);
        }
    }
}
