/// Public link that opens the feed on one video
pub fn share_link(site_url: &str, video_id: &str) -> String {
    format!("{}/?video={}", site_url.trim_end_matches('/'), video_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareTarget {
    WhatsApp,
    Twitter,
    Facebook,
    LinkedIn,
}

impl ShareTarget {
    pub const ALL: [ShareTarget; 4] = [
        ShareTarget::WhatsApp,
        ShareTarget::Twitter,
        ShareTarget::Facebook,
        ShareTarget::LinkedIn,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ShareTarget::WhatsApp => "WhatsApp",
            ShareTarget::Twitter => "Twitter",
            ShareTarget::Facebook => "Facebook",
            ShareTarget::LinkedIn => "LinkedIn",
        }
    }

    /// Intent URL that shares `link` with `title`
    pub fn url(&self, link: &str, title: &str) -> String {
        let link = urlencoding::encode(link);
        let title = urlencoding::encode(title);
        match self {
            ShareTarget::WhatsApp => format!("https://wa.me/?text={}%20{}", title, link),
            ShareTarget::Twitter => format!("https://twitter.com/intent/tweet?text={}&url={}", title, link),
            ShareTarget::Facebook => format!("https://www.facebook.com/sharer/sharer.php?u={}", link),
            ShareTarget::LinkedIn => format!("https://www.linkedin.com/sharing/share-offsite/?url={}", link),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_link() {
        assert_eq!(share_link("https://skillfeed.app/", "v1"), "https://skillfeed.app/?video=v1");
    }

    #[test]
    fn test_target_urls_are_encoded() {
        let link = share_link("https://skillfeed.app", "v1");
        assert_eq!(
            ShareTarget::WhatsApp.url(&link, "Tile work"),
            "https://wa.me/?text=Tile%20work%20https%3A%2F%2Fskillfeed.app%2F%3Fvideo%3Dv1"
        );
        assert!(ShareTarget::Facebook
            .url(&link, "x")
            .ends_with("?u=https%3A%2F%2Fskillfeed.app%2F%3Fvideo%3Dv1"));
        assert_eq!(ShareTarget::ALL.len(), 4);
    }
}
