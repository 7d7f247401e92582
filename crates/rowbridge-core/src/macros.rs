/// Generates `Display` and `FromStr` impls for option-valued enums.
///
/// `str_enum!(Enum, norm, "msg", Variant => "canonical" [, "alias"]*; ...)`
///
/// Parse failures become [`ConnectorError::Configuration`](crate::error::ConnectorError)
/// carrying `msg` and the offending (normalized) input.
///
/// # Normalization modes
///
/// - `lowercase`: `trim().to_lowercase()`
/// - `lowercase_udash`: `trim().to_lowercase().replace('_', "-")`
macro_rules! str_enum {
    ($enum_name:ident, $norm:ident, $err_msg:literal,
        $( $variant:ident => $display:literal $(, $alias:literal)* );+ $(;)?
    ) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let s = match self {
                    $( Self::$variant => $display, )+
                };
                f.write_str(s)
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = crate::error::ConnectorError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = str_enum!(@normalize $norm s);
                match normalized.as_str() {
                    $( $display $(| $alias)* => Ok(Self::$variant), )+
                    other => Err(crate::error::ConnectorError::Configuration(
                        format!("{}: '{}'", $err_msg, other),
                    )),
                }
            }
        }
    };

    (@normalize lowercase $s:ident) => { $s.trim().to_lowercase() };
    (@normalize lowercase_udash $s:ident) => { $s.trim().to_lowercase().replace('_', "-") };
}
