use crate::BotConfig;
use crate::moderation::GuildModerationStore;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// State shared by every command invocation
pub struct DataInner {
    pub moderation: Arc<GuildModerationStore>,
    pub config: BotConfig,
}

impl fmt::Debug for DataInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataInner")
            .field("attached_guilds", &self.moderation.attached_guilds().len())
            .field("config", &self.config)
            .finish()
    }
}

/// Cheaply cloneable handle handed to poise as user data
#[derive(Debug, Clone)]
pub struct Data(pub Arc<DataInner>);

impl Data {
    #[must_use]
    pub fn new(moderation: Arc<GuildModerationStore>, config: BotConfig) -> Self {
        Self(Arc::new(DataInner { moderation, config }))
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
