//! Well-known platform event type constants.
//!
//! These must match the names registered in the default schema registry
//! and the types emitted by the producing services. Dot prefixes drive
//! channel routing, so renaming one is a cross-service change.

/// A payment settled successfully.
pub const EVENT_PAYMENT_SUCCEEDED: &str = "payment.succeeded";

/// A payment attempt failed.
pub const EVENT_PAYMENT_FAILED: &str = "payment.failed";

/// A settled payment was refunded.
pub const EVENT_PAYMENT_REFUNDED: &str = "payment.refunded";

/// A new user account was created.
pub const EVENT_USER_REGISTERED: &str = "user.registered";

/// A user signed in.
pub const EVENT_USER_LOGIN: &str = "user.login";

/// A user enrolled in a course.
pub const EVENT_COURSE_ENROLLED: &str = "course.enrolled";

/// A user completed a course.
pub const EVENT_COURSE_COMPLETED: &str = "course.completed";

/// A learning path definition changed.
pub const EVENT_PATH_UPDATED: &str = "path.updated";

/// A hands-on lab session started.
pub const EVENT_LAB_STARTED: &str = "lab.started";

/// A hands-on lab session finished.
pub const EVENT_LAB_COMPLETED: &str = "lab.completed";

/// An administrator performed a privileged action.
pub const EVENT_ADMIN_ACTION: &str = "admin.action";

/// A scheduled maintenance window was announced.
pub const EVENT_SYSTEM_MAINTENANCE: &str = "system.maintenance";
