pub const DBUS_NAME_SYNC: &str = "io.ftpsync.Sync1";
pub const DBUS_INTERFACE_SYNC: &str = "io.ftpsync.Sync1";
pub const DBUS_OBJECT_PATH_SYNC: &str = "/io/ftpsync/Sync1";

pub const DBUS_ERROR_INVALID_PARAMS: &str = "io.ftpsync.Sync1.Error.InvalidParams";
pub const DBUS_ERROR_FAILED: &str = "io.ftpsync.Sync1.Error.Failed";
