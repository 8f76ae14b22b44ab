use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Largest payload [`decode`] will accept. A length prefix claiming more than this is
/// reported as a [`DecodeError`] instead of being allocated.
pub const MAX_DECODE_LEN: u64 = 64 * 1024 * 1024;

/// A value that can cross the wire as a command argument or result.
///
/// Implemented for `()`, `bool`, the fixed-width integers, floats, `char`, `String`, and for
/// `Vec`, `Option`, `Box` and tuples (up to eight elements) of other `Wire` types.
///
/// Applications can implement it for their own types as long as the `Serialize` impl is
/// derived and every field is itself `Wire`:
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, Debug, PartialEq)]
/// struct RemoteStopwatch {
///     id: u64,
///     name: String,
/// }
///
/// impl rpccommand::Wire for RemoteStopwatch {}
///
/// let sw = RemoteStopwatch { id: 7, name: "lap".into() };
/// let bytes = rpccommand::encode(&sw);
/// assert_eq!(rpccommand::decode::<RemoteStopwatch>(&bytes).unwrap(), sw);
/// ```
pub trait Wire: Serialize + DeserializeOwned {}

macro_rules! impl_wire {
    ($($rust_type:ty),* $(,)?) => {
        $(impl Wire for $rust_type {})*
    };
}

impl_wire!(
    (),
    bool,
    u8,
    u16,
    u32,
    u64,
    u128,
    i8,
    i16,
    i32,
    i64,
    i128,
    f32,
    f64,
    char,
    String,
);

impl<T: Wire> Wire for Vec<T> {}
impl<T: Wire> Wire for Option<T> {}
impl<T: Wire> Wire for Box<T> {}

macro_rules! impl_wire_tuple {
    ($($name:ident),+) => {
        impl<$($name: Wire),+> Wire for ($($name,)+) {}
    };
}

impl_wire_tuple!(A);
impl_wire_tuple!(A, B);
impl_wire_tuple!(A, B, C);
impl_wire_tuple!(A, B, C, D);
impl_wire_tuple!(A, B, C, D, E);
impl_wire_tuple!(A, B, C, D, E, F);
impl_wire_tuple!(A, B, C, D, E, F, G);
impl_wire_tuple!(A, B, C, D, E, F, G, H);

/// Bytes did not have the shape of the type they were decoded as.
#[derive(Debug, Error)]
#[error("decode error: {0}")]
pub struct DecodeError(#[from] bincode::Error);

/// An application value whose `Serialize` impl the codec cannot express, such as one using
/// `#[serde(flatten)]`.
#[derive(Debug, Error)]
#[error("encode error: {0}")]
pub struct EncodeError(#[from] bincode::Error);

/// Encodes `value` into its wire form. The output depends only on the value.
///
/// # Panics
///
/// Only if an application type's `Serialize` impl cannot be encoded; none of the built-in
/// [`Wire`] types can fail. Use [`try_encode`] for values of application types.
pub fn encode<T: Wire>(value: &T) -> Vec<u8> {
    try_encode(value).expect("Wire values always serialize")
}

pub fn try_encode<T: Wire>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let bytes = bincode::DefaultOptions::new().serialize(value)?;
    Ok(bytes)
}

/// Decodes a value previously produced by [`encode`]. The whole input must be consumed.
pub fn decode<T: Wire>(bytes: &[u8]) -> Result<T, DecodeError> {
    let value = bincode::DefaultOptions::new()
        .with_limit(MAX_DECODE_LEN)
        .deserialize(bytes)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{distributions::Alphanumeric, Rng};

    fn random_string(rng: &mut impl Rng) -> String {
        let len = rng.gen_range(0..32);
        (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect()
    }

    type Mixed = (i64, String, Vec<u32>, (bool, f64), Option<char>);

    #[test]
    fn random_values_survive_the_wire() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let value: Mixed = (
                rng.gen(),
                random_string(&mut rng),
                (0..rng.gen_range(0..16)).map(|_| rng.gen()).collect(),
                (rng.gen(), rng.gen()),
                rng.gen::<bool>().then(|| rng.gen()),
            );
            let bytes = encode(&value);
            assert_eq!(decode::<Mixed>(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn nested_containers() {
        let value: Vec<(String, Vec<Vec<u8>>)> = vec![
            ("a".into(), vec![vec![], vec![1, 2, 3]]),
            ("".into(), vec![]),
        ];
        assert_eq!(decode::<Vec<(String, Vec<Vec<u8>>)>>(&encode(&value)).unwrap(), value);
        assert_eq!(decode::<()>(&encode(&())).unwrap(), ());
    }

    #[test]
    fn encoding_is_deterministic() {
        let value = (String::from("Stopwatch_01"), vec![1u64, u64::MAX]);
        assert_eq!(encode(&value), encode(&value.clone()));
    }

    #[test]
    fn unencodable_value_is_an_error() {
        #[derive(Serialize, serde::Deserialize)]
        struct Inner {
            a: u8,
        }

        #[derive(Serialize, serde::Deserialize)]
        struct Flat {
            #[serde(flatten)]
            inner: Inner,
        }

        impl Wire for Flat {}

        let flat = Flat {
            inner: Inner { a: 1 },
        };
        assert!(try_encode(&flat).is_err());
        assert!(try_encode(&5u8).is_ok());
    }

    #[test]
    fn truncated_input_is_an_error() {
        let bytes = encode(&String::from("hello, world"));
        assert!(decode::<String>(&bytes[..bytes.len() - 1]).is_err());
        assert!(decode::<u64>(&[]).is_err());
    }

    #[test]
    fn trailing_input_is_an_error() {
        let mut bytes = encode(&5u8);
        bytes.push(0);
        assert!(decode::<u8>(&bytes).is_err());
    }

    #[test]
    fn wrong_shape_is_an_error() {
        assert!(decode::<bool>(&[7]).is_err());
        assert!(decode::<String>(&encode(&vec![0xffu8, 0xfe])).is_err());
    }

    #[test]
    fn oversized_length_prefix_is_an_error() {
        // varint marker 0xfd is followed by a little-endian u64 length
        let mut bytes = vec![0xfd];
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(decode::<Vec<u8>>(&bytes).is_err());
    }
}
