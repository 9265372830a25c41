use crate::error::Error;

/// Connection parameters the host passes on the command line.
///
/// The host uses single-dash long flags (`-port 28196 -pluginUUID abc
/// -registerEvent registerPlugin -info {...}`), so these are parsed as
/// flag/value pairs rather than with a derive-style CLI parser. The `-info`
/// blob is accepted and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationParams {
    pub port: u16,
    pub plugin_uuid: String,
    pub register_event: String,
}

impl RegistrationParams {
    /// Parse registration parameters from process arguments.
    ///
    /// The first argument (program name) may be present or already stripped;
    /// anything that is not a recognized flag/value pair is skipped.
    pub fn from_args<I>(args: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = String>,
    {
        let mut port = None;
        let mut plugin_uuid = None;
        let mut register_event = None;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| Error::registration("-port is missing a value"))?;
                    let parsed = value
                        .parse::<u16>()
                        .map_err(|_| Error::registration(format!("invalid port: {value}")))?;
                    port = Some(parsed);
                }
                "-pluginUUID" => {
                    plugin_uuid = Some(
                        args.next()
                            .ok_or_else(|| Error::registration("-pluginUUID is missing a value"))?,
                    );
                }
                "-registerEvent" => {
                    register_event = Some(
                        args.next()
                            .ok_or_else(|| {
                                Error::registration("-registerEvent is missing a value")
                            })?,
                    );
                }
                "-info" => {
                    // Environment description from the host; not needed.
                    let _ = args.next();
                }
                _ => {}
            }
        }

        Ok(RegistrationParams {
            port: port.ok_or_else(|| Error::registration("-port not provided"))?,
            plugin_uuid: plugin_uuid
                .ok_or_else(|| Error::registration("-pluginUUID not provided"))?,
            register_event: register_event
                .ok_or_else(|| Error::registration("-registerEvent not provided"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parses_host_argument_order() {
        let params = RegistrationParams::from_args(args(&[
            "plugin",
            "-port",
            "28196",
            "-pluginUUID",
            "0123456789ABCDEF",
            "-registerEvent",
            "registerPlugin",
            "-info",
            "{\"application\":{}}",
        ]))
        .unwrap();

        assert_eq!(params.port, 28196);
        assert_eq!(params.plugin_uuid, "0123456789ABCDEF");
        assert_eq!(params.register_event, "registerPlugin");
    }

    #[test]
    fn test_parses_reordered_flags() {
        let params = RegistrationParams::from_args(args(&[
            "-registerEvent",
            "registerPlugin",
            "-port",
            "9000",
            "-pluginUUID",
            "uuid",
        ]))
        .unwrap();

        assert_eq!(params.port, 9000);
    }

    #[test]
    fn test_missing_port_is_an_error() {
        let err = RegistrationParams::from_args(args(&[
            "-pluginUUID",
            "uuid",
            "-registerEvent",
            "registerPlugin",
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("-port"));
    }

    #[test]
    fn test_non_numeric_port_is_an_error() {
        let err = RegistrationParams::from_args(args(&[
            "-port",
            "not-a-port",
            "-pluginUUID",
            "uuid",
            "-registerEvent",
            "registerPlugin",
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("invalid port"));
    }
}
