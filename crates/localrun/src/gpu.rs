// Host GPU detection by device node.

use std::path::Path;

/// Hardware encoder available on the coordinator host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuKind {
    Nvenc,
    Qsv,
}

/// NVENC wins when both devices exist; a render node alone means QSV.
pub fn detect_gpu() -> Option<GpuKind> {
    detect_gpu_at(Path::new("/"))
}

/// Device-node probe rooted at `root`, so tests can fake a /dev tree.
pub fn detect_gpu_at(root: &Path) -> Option<GpuKind> {
    if root.join("dev/nvidia0").exists() {
        Some(GpuKind::Nvenc)
    } else if root.join("dev/dri/renderD128").exists() {
        Some(GpuKind::Qsv)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nvidia_device_wins() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("dev/dri")).unwrap();
        std::fs::write(root.path().join("dev/nvidia0"), b"").unwrap();
        std::fs::write(root.path().join("dev/dri/renderD128"), b"").unwrap();
        assert_eq!(detect_gpu_at(root.path()), Some(GpuKind::Nvenc));
    }

    #[test]
    fn render_node_means_qsv() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("dev/dri")).unwrap();
        std::fs::write(root.path().join("dev/dri/renderD128"), b"").unwrap();
        assert_eq!(detect_gpu_at(root.path()), Some(GpuKind::Qsv));
    }

    #[test]
    fn bare_host_has_no_gpu() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(detect_gpu_at(root.path()), None);
    }
}
