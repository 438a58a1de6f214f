//! The page the prompt lives in.

/// Text of the update banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateBanner {
    pub message: String,
    pub accept_label: String,
    pub dismiss_label: String,
}

impl Default for UpdateBanner {
    fn default() -> Self {
        Self {
            message: "Update available. Refresh to get the latest version.".to_string(),
            accept_label: "Update".to_string(),
            dismiss_label: "Later".to_string(),
        }
    }
}

/// Page-side effects the prompt needs.
pub trait PageHost: Send + Sync {
    /// Show the banner. Called at most once per page load.
    fn show_banner(&self, banner: &UpdateBanner);

    fn remove_banner(&self);

    /// Full page reload.
    fn reload(&self);
}
