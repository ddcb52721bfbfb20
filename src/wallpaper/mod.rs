use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

/// Opaque sink that finished photos are handed to
pub trait WallpaperSink {
    fn apply(&self, image_path: &Path) -> Result<()>;
}

/// Sets a photo as the desktop background. The photo is first converted to
/// a BMP at a fixed path, which is what the Windows API is pointed at.
/// On other platforms applying is a logged no-op.
pub struct DesktopWallpaper {
    bmp_path: PathBuf,
}

impl DesktopWallpaper {
    pub fn new<P: AsRef<Path>>(storage_dir: P) -> Self {
        Self {
            bmp_path: storage_dir.as_ref().join("wallpaper.bmp"),
        }
    }
}

impl WallpaperSink for DesktopWallpaper {
    fn apply(&self, image_path: &Path) -> Result<()> {
        let image = image::open(image_path)
            .with_context(|| format!("Failed to open {}", image_path.display()))?;
        image
            .save(&self.bmp_path)
            .with_context(|| format!("Failed to write {}", self.bmp_path.display()))?;
        info!("Setting wallpaper: {}", self.bmp_path.display());
        set_desktop_background(&self.bmp_path)
    }
}

#[cfg(windows)]
fn set_desktop_background(path: &Path) -> Result<()> {
    use std::ffi::c_void;
    use std::os::windows::ffi::OsStrExt;

    const SPI_SETDESKWALLPAPER: u32 = 20;
    const SPIF_UPDATEINIFILE: u32 = 3;

    #[link(name = "user32")]
    unsafe extern "system" {
        fn SystemParametersInfoW(
            action: u32,
            param: u32,
            pv_param: *mut c_void,
            win_ini: u32,
        ) -> i32;
    }

    let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
    wide.push(0);

    let ok = unsafe {
        SystemParametersInfoW(
            SPI_SETDESKWALLPAPER,
            0,
            wide.as_mut_ptr() as *mut c_void,
            SPIF_UPDATEINIFILE,
        )
    };
    if ok == 0 {
        anyhow::bail!("SystemParametersInfoW failed");
    }
    Ok(())
}

#[cfg(not(windows))]
fn set_desktop_background(_path: &Path) -> Result<()> {
    log::warn!("Setting the desktop wallpaper is only supported on Windows");
    Ok(())
}
