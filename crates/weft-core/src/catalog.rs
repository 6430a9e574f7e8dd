use serde::{Deserialize, Serialize};

/// Community-wide capability granted by a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerCapability {
    Administrator,
    ManageCommunity,
    ManageRoles,
    ManageChannels,
    ViewChannels,
    SendMessages,
    ManageMessages,
    AttachFiles,
    AddReactions,
    MentionEveryone,
    MuteMembers,
    KickMembers,
    BanMembers,
    TimeoutMembers,
    ViewAuditLog,
}

/// Capability scoped to a single channel through an override entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCapability {
    ViewChannel,
    SendMessages,
    ManageMessages,
    AttachFiles,
    AddReactions,
    MentionEveryone,
    MuteMembers,
}

const KNOWN_SERVER_CAPABILITIES: [ServerCapability; 15] = [
    ServerCapability::Administrator,
    ServerCapability::ManageCommunity,
    ServerCapability::ManageRoles,
    ServerCapability::ManageChannels,
    ServerCapability::ViewChannels,
    ServerCapability::SendMessages,
    ServerCapability::ManageMessages,
    ServerCapability::AttachFiles,
    ServerCapability::AddReactions,
    ServerCapability::MentionEveryone,
    ServerCapability::MuteMembers,
    ServerCapability::KickMembers,
    ServerCapability::BanMembers,
    ServerCapability::TimeoutMembers,
    ServerCapability::ViewAuditLog,
];

const KNOWN_CHANNEL_CAPABILITIES: [ChannelCapability; 7] = [
    ChannelCapability::ViewChannel,
    ChannelCapability::SendMessages,
    ChannelCapability::ManageMessages,
    ChannelCapability::AttachFiles,
    ChannelCapability::AddReactions,
    ChannelCapability::MentionEveryone,
    ChannelCapability::MuteMembers,
];

impl ServerCapability {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::ManageCommunity => "manage_community",
            Self::ManageRoles => "manage_roles",
            Self::ManageChannels => "manage_channels",
            Self::ViewChannels => "view_channels",
            Self::SendMessages => "send_messages",
            Self::ManageMessages => "manage_messages",
            Self::AttachFiles => "attach_files",
            Self::AddReactions => "add_reactions",
            Self::MentionEveryone => "mention_everyone",
            Self::MuteMembers => "mute_members",
            Self::KickMembers => "kick_members",
            Self::BanMembers => "ban_members",
            Self::TimeoutMembers => "timeout_members",
            Self::ViewAuditLog => "view_audit_log",
        }
    }
}

impl ChannelCapability {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ViewChannel => "view_channel",
            Self::SendMessages => "send_messages",
            Self::ManageMessages => "manage_messages",
            Self::AttachFiles => "attach_files",
            Self::AddReactions => "add_reactions",
            Self::MentionEveryone => "mention_everyone",
            Self::MuteMembers => "mute_members",
        }
    }
}

/// Community-level grant equivalent consulted when a channel carries no
/// override for a capability.
#[must_use]
pub const fn server_equivalent(capability: ChannelCapability) -> ServerCapability {
    match capability {
        ChannelCapability::ViewChannel => ServerCapability::ViewChannels,
        ChannelCapability::SendMessages => ServerCapability::SendMessages,
        ChannelCapability::ManageMessages => ServerCapability::ManageMessages,
        ChannelCapability::AttachFiles => ServerCapability::AttachFiles,
        ChannelCapability::AddReactions => ServerCapability::AddReactions,
        ChannelCapability::MentionEveryone => ServerCapability::MentionEveryone,
        ChannelCapability::MuteMembers => ServerCapability::MuteMembers,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerCapabilitySet(u64);

impl ServerCapabilitySet {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn contains(self, capability: ServerCapability) -> bool {
        self.0 & server_capability_mask(capability) != 0
    }

    pub fn insert(&mut self, capability: ServerCapability) {
        self.0 |= server_capability_mask(capability);
    }

    pub fn remove(&mut self, capability: ServerCapability) {
        self.0 &= !server_capability_mask(capability);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelCapabilitySet(u64);

impl ChannelCapabilitySet {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn contains(self, capability: ChannelCapability) -> bool {
        self.0 & channel_capability_mask(capability) != 0
    }

    pub fn insert(&mut self, capability: ChannelCapability) {
        self.0 |= channel_capability_mask(capability);
    }

    pub fn remove(&mut self, capability: ChannelCapability) {
        self.0 &= !channel_capability_mask(capability);
    }
}

#[must_use]
pub fn known_server_mask() -> u64 {
    KNOWN_SERVER_CAPABILITIES
        .into_iter()
        .fold(0_u64, |bits, capability| {
            bits | server_capability_mask(capability)
        })
}

#[must_use]
pub fn known_channel_mask() -> u64 {
    KNOWN_CHANNEL_CAPABILITIES
        .into_iter()
        .fold(0_u64, |bits, capability| {
            bits | channel_capability_mask(capability)
        })
}

/// Splits raw persisted bits into the known set and the unknown remainder.
#[must_use]
pub fn mask_server_capabilities(raw_bits: u64) -> (ServerCapabilitySet, u64) {
    let mask = known_server_mask();
    (ServerCapabilitySet::from_bits(raw_bits & mask), raw_bits & !mask)
}

#[must_use]
pub fn mask_channel_capabilities(raw_bits: u64) -> (ChannelCapabilitySet, u64) {
    let mask = known_channel_mask();
    (ChannelCapabilitySet::from_bits(raw_bits & mask), raw_bits & !mask)
}

#[must_use]
pub fn all_server_capabilities() -> ServerCapabilitySet {
    ServerCapabilitySet::from_bits(known_server_mask())
}

/// Grants carried by the synthetic `everyone` role when a community is
/// created; editable afterwards like any other role's capability set.
#[must_use]
pub fn default_everyone_capabilities() -> ServerCapabilitySet {
    let mut capabilities = ServerCapabilitySet::empty();
    capabilities.insert(ServerCapability::ViewChannels);
    capabilities.insert(ServerCapability::SendMessages);
    capabilities.insert(ServerCapability::AttachFiles);
    capabilities.insert(ServerCapability::AddReactions);
    capabilities
}

const fn server_capability_mask(capability: ServerCapability) -> u64 {
    match capability {
        ServerCapability::Administrator => 1 << 0,
        ServerCapability::ManageCommunity => 1 << 1,
        ServerCapability::ManageRoles => 1 << 2,
        ServerCapability::ManageChannels => 1 << 3,
        ServerCapability::ViewChannels => 1 << 4,
        ServerCapability::SendMessages => 1 << 5,
        ServerCapability::ManageMessages => 1 << 6,
        ServerCapability::AttachFiles => 1 << 7,
        ServerCapability::AddReactions => 1 << 8,
        ServerCapability::MentionEveryone => 1 << 9,
        ServerCapability::MuteMembers => 1 << 10,
        ServerCapability::KickMembers => 1 << 11,
        ServerCapability::BanMembers => 1 << 12,
        ServerCapability::TimeoutMembers => 1 << 13,
        ServerCapability::ViewAuditLog => 1 << 14,
    }
}

const fn channel_capability_mask(capability: ChannelCapability) -> u64 {
    match capability {
        ChannelCapability::ViewChannel => 1 << 0,
        ChannelCapability::SendMessages => 1 << 1,
        ChannelCapability::ManageMessages => 1 << 2,
        ChannelCapability::AttachFiles => 1 << 3,
        ChannelCapability::AddReactions => 1 << 4,
        ChannelCapability::MentionEveryone => 1 << 5,
        ChannelCapability::MuteMembers => 1 << 6,
    }
}
