//! Packet definitions for all four protocol states.
//!
//! Packet IDs live in a per-state, per-side namespace, so the pair of a
//! packet's ID and the connection's current state is what identifies it on
//! the wire.

/// Declares a group of packet structs along with their [`Encode`],
/// [`Decode`] and [`Packet`] implementations. Fields are encoded in
/// declaration order.
///
/// [`Encode`]: crate::Encode
/// [`Decode`]: crate::Decode
/// [`Packet`]: crate::Packet
macro_rules! packet_group {
    (
        $(
            $(#[$attr:meta])*
            $name:ident = $id:literal, $side:ident, $state:ident {
                $( $(#[$fattr:meta])* $field:ident : $fty:ty ),* $(,)?
            }
        )*
    ) => {
        $(
            $(#[$attr])*
            #[derive(Clone, PartialEq, Debug)]
            pub struct $name {
                $( $(#[$fattr])* pub $field: $fty, )*
            }

            impl $crate::Encode for $name {
                #[allow(unused_variables, unused_mut)]
                fn encode(&self, mut w: impl std::io::Write) -> $crate::Result<()> {
                    $( $crate::Encode::encode(&self.$field, &mut w)?; )*
                    Ok(())
                }
            }

            impl $crate::Decode<'_> for $name {
                #[allow(unused_variables)]
                fn decode(r: &mut &[u8]) -> $crate::Result<Self> {
                    Ok(Self {
                        $( $field: $crate::Decode::decode(r)?, )*
                    })
                }
            }

            impl $crate::Packet for $name {
                const ID: i32 = $id;
                const NAME: &'static str = stringify!($name);
                const SIDE: $crate::PacketSide = $crate::PacketSide::$side;
                const STATE: $crate::ProtocolState = $crate::ProtocolState::$state;
            }
        )*
    };
}

pub(crate) use packet_group;

pub mod handshaking;
pub mod login;
pub mod play;
pub mod status;
