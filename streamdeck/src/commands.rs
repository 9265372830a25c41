use serde::Serialize;

/// Where a visual change applies. The host accepts hardware-only and
/// software-only variants; the plugin always targets both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Target {
    HardwareAndSoftware = 0,
}

/// Newtype so `Target` serializes as the numeric code the host expects.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TargetRepr(pub Target);

impl Serialize for TargetRepr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.0 as u8)
    }
}

#[derive(Serialize)]
pub(crate) struct SetTitlePayload<'a> {
    pub title: &'a str,
    pub target: TargetRepr,
}

#[derive(Serialize)]
pub(crate) struct SetStatePayload {
    pub state: u8,
}

#[derive(Serialize)]
pub(crate) struct SetImagePayload<'a> {
    pub image: &'a str,
    pub target: TargetRepr,
}

#[derive(Serialize)]
pub(crate) struct OpenUrlPayload<'a> {
    pub url: &'a str,
}

/// Generic outbound frame. `context` is absent for plugin-scoped commands
/// such as `openUrl`.
#[derive(Serialize)]
pub(crate) struct CommandFrame<'a, P: Serialize> {
    pub event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<&'a str>,
    pub payload: P,
}
