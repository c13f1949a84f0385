use uuid::Uuid;

/// Millisecond-prefixed ids; rows created in different milliseconds sort in
/// creation order.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}
