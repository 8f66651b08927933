/// Declares a closed set of wire-format constants alongside a matching enum
/// name, so frame type codes (see `packet::frame`) live next to their names
/// instead of scattered through match arms.
#[macro_export]
macro_rules! wire_codes {
    {$($typename:ident = $encoding:expr,)*} => {
        #[allow(non_camel_case_types)]
        pub struct FrameType;

        impl FrameType {
            $(pub const $typename: u64 = $encoding;)*
        }
    }
}
