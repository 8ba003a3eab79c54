//! Canned listener replies.

pub const START: &str = "Hi! Share your phone number with the button below to start receiving notifications.";
pub const SHARE_CONTACT_BUTTON: &str = "Share phone number";
pub const SHARE_CONTACT_PLACEHOLDER: &str = "Receive notifications";
pub const REGISTERING: &str = "Registering you, one moment...";
pub const SOMETHING_WENT_WRONG: &str = "Something went wrong. Please try again later.";

pub fn not_registered(phone_number: &str) -> String {
    format!("The number {phone_number} is not subscribed to any notifications.")
}

pub fn registered(phone_number: &str) -> String {
    format!("Done! Notifications for {phone_number} will arrive in this chat.")
}

pub fn already_known(phone_number: &str) -> String {
    format!("I already know you, {phone_number}. Notifications keep arriving here.")
}
