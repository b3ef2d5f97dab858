/// Channel variant, decided by the name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Public,
    Private,
    Presence,
}

impl ChannelKind {
    pub const PRIVATE_PREFIX: &'static str = "private-";
    pub const PRESENCE_PREFIX: &'static str = "presence-";

    pub fn from_name(name: &str) -> Self {
        if name.starts_with(Self::PRESENCE_PREFIX) {
            ChannelKind::Presence
        } else if name.starts_with(Self::PRIVATE_PREFIX) {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Public => "public",
            ChannelKind::Private => "private",
            ChannelKind::Presence => "presence",
        }
    }

    /// Private and presence channels need a signed `auth`
    pub fn requires_auth(&self) -> bool {
        !matches!(self, ChannelKind::Public)
    }

    pub fn allows_client_events(&self) -> bool {
        self.requires_auth()
    }
}
