//! SQL statements for the encrypted conversation store

pub const SQL_INSERT_RECORD: &str = "INSERT INTO user_conversations \
     (username, ciphertext, encryption_params, created_at, updated_at) \
     VALUES (?, ?, ?, ?, ?) \
     ON CONFLICT(username) DO UPDATE SET \
     ciphertext = excluded.ciphertext, \
     encryption_params = excluded.encryption_params, \
     updated_at = excluded.updated_at";

pub const SQL_GET_RECORD: &str = "SELECT username, ciphertext, encryption_params, created_at, updated_at \
     FROM user_conversations WHERE username = ?";

pub const SQL_UPDATE_RECORD: &str = "UPDATE user_conversations \
     SET ciphertext = ?, encryption_params = ?, updated_at = ? \
     WHERE username = ?";

pub const SQL_DELETE_RECORD: &str = "DELETE FROM user_conversations WHERE username = ?";
