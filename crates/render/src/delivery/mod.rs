pub mod slack;
pub mod teams;

pub use slack::{SlackClient, SlackDeliveryError, SlackUserHealth};
pub use teams::{TeamsClient, TeamsDeliveryError};

/// A page title + its uploaded file's caption, formatted the way
/// `constants.FormatMessageTitle(WithFilter)` does.
pub fn message_title(report_name: &str, filter_description: Option<&str>, page_name: &str) -> String {
    match filter_description {
        Some(desc) => format!("{report_name} ({desc}): {page_name}"),
        None => format!("{report_name}: {page_name}"),
    }
}

/// `constants.FormatPageURL`: appends the page id as a query param onto the
/// report's web URL so the posted comment deep-links straight to the page.
pub fn page_url(report_web_url: &str, page_id: &str) -> String {
    format!("{report_web_url}?pageName={page_id}")
}

/// Prefixes a comment with an `@user` mention when the post originated from
/// a scheduled task rather than an on-demand share.
pub fn scheduled_comment(is_scheduled: bool, user_id: &str, comment: String) -> String {
    if is_scheduled {
        format!("<@{user_id}>, {comment}")
    } else {
        comment
    }
}
