use parley_types::models::User;

/// A user together with the stored password hash. Only handed out for
/// credential verification; everything else sees [`User`].
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}
