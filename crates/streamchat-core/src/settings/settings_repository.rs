use super::client_settings::ClientSettings;
use crate::repositories::{BoxFuture, RepositoryResult};

pub trait SettingsRepository: Send + Sync + 'static {
    /// Load settings, or defaults when nothing has been saved
    fn load(&self) -> BoxFuture<'static, RepositoryResult<ClientSettings>>;

    fn save(&self, settings: ClientSettings) -> BoxFuture<'static, RepositoryResult<()>>;
}
