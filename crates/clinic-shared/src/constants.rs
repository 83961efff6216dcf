/// Prefix of every per-user push channel (`user.<contact_address>`).
pub const USER_CHANNEL_PREFIX: &str = "user.";

/// Push event names consumed by the portal.
pub const EVENT_MESSAGE_SENT: &str = "message.sent";
pub const EVENT_NOTIFICATION_CREATED: &str = "notification.created";
pub const EVENT_APPOINTMENT_CREATED: &str = "appointment.created";
pub const EVENT_APPOINTMENT_UPDATED: &str = "appointment.updated";
pub const EVENT_APPOINTMENT_CANCELLED: &str = "appointment.cancelled";
pub const EVENT_APPOINTMENT_REMINDER: &str = "appointment.reminder";

/// Prefix for notification ids assigned locally when the server sent none.
pub const LOCAL_NOTIFICATION_PREFIX: &str = "local-";

/// Default transport notification buffer.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Default capacity of the raw-event debug sink.
pub const DEBUG_SINK_CAPACITY: usize = 1024;

/// Related-type tags carried by notifications.
pub const RELATED_CHAT: &str = "chat";
pub const RELATED_APPOINTMENT: &str = "appointment";
