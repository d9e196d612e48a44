use std::{borrow::Cow, fmt, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();
const FIELD_SIZE: usize = size_of::<u32>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const VAR_H: Header = 2;

/// Reserved variable name a worker sends once its contributions for the round are complete.
pub const BATCH_BARRIER_MESSAGE: &str = "BATCH_BARRIER@RECV";

/// Reserved variable name that stops the aggregation server.
pub const TERMINATE_MESSAGE: &str = "TERMINATE@RECV";

/// The logical kind of a named message, decided only by its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Data,
    BatchBarrier,
    Terminate,
}

impl MessageKind {
    /// Classifies a message by its variable name.
    ///
    /// # Arguments
    /// * `name` - The name carried by the message.
    ///
    /// # Returns
    /// The control kind for the reserved names, `Data` for everything else.
    pub fn classify(name: &str) -> Self {
        match name {
            BATCH_BARRIER_MESSAGE => Self::BatchBarrier,
            TERMINATE_MESSAGE => Self::Terminate,
            _ => Self::Data,
        }
    }
}

/// A borrowed named tensor as it travels on the wire.
#[derive(Debug, Clone, Copy)]
pub struct VarRef<'a> {
    pub name: &'a str,
    pub dims: &'a [u32],
    pub values: &'a [f32],
}

impl<'a> VarRef<'a> {
    /// Creates a control message, a var with a reserved name and no values.
    ///
    /// # Arguments
    /// * `name` - One of the reserved names.
    pub fn control(name: &'a str) -> Self {
        Self {
            name,
            dims: &[],
            values: &[],
        }
    }
}

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    Var(VarRef<'a>),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Fetch { names: Vec<String> },
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    fn buf_is_too_small<T>(size: usize, needed: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {needed} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(byte: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {byte}"),
        ))
    }

    fn invalid_data<T, E: fmt::Debug>(err: E) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received a malformed var payload: {err:?}"),
        ))
    }
}

/// Rounds `len` up to the next multiple of 4.
fn padded(len: usize) -> usize {
    len.next_multiple_of(FIELD_SIZE)
}

/// Splits a big endian `u32` off the front of `buf`.
fn take_u32(buf: &[u8]) -> Option<(u32, &[u8])> {
    let (field, rest) = buf.split_first_chunk::<FIELD_SIZE>()?;
    Some((u32::from_be_bytes(*field), rest))
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, &cmd).unwrap();
                None
            }
            Msg::Data(Payload::Var(var)) => {
                let VarRef { name, dims, values } = *var;

                buf.extend_from_slice(&VAR_H.to_be_bytes());
                buf.extend_from_slice(&(name.len() as u32).to_be_bytes());
                buf.extend_from_slice(&(dims.len() as u32).to_be_bytes());
                buf.extend_from_slice(bytemuck::cast_slice(dims));
                buf.extend_from_slice(name.as_bytes());
                buf.resize(buf.len() + padded(name.len()) - name.len(), 0);
                Some(bytemuck::cast_slice(values))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        let buf: &'a [u8] = buf;

        let Some((kind, rest)) = take_u32(buf) else {
            return Self::buf_is_too_small(buf.len(), HEADER_SIZE);
        };

        match kind {
            ERR_H => {
                let string = std::str::from_utf8(rest).or_else(Self::invalid_data)?;
                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_H => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            VAR_H => {
                let Some((name_len, rest)) = take_u32(rest) else {
                    return Self::buf_is_too_small(buf.len(), HEADER_SIZE + FIELD_SIZE);
                };
                let Some((ndims, rest)) = take_u32(rest) else {
                    return Self::buf_is_too_small(buf.len(), HEADER_SIZE + 2 * FIELD_SIZE);
                };

                let dims_len = ndims as usize * FIELD_SIZE;
                let name_len = name_len as usize;
                let needed = dims_len + padded(name_len);

                if rest.len() < needed {
                    return Self::buf_is_too_small(buf.len(), buf.len() - rest.len() + needed);
                }

                let (dims, rest) = rest.split_at(dims_len);
                let (name, values) = rest.split_at(padded(name_len));

                let dims = bytemuck::try_cast_slice(dims).or_else(Self::invalid_data)?;
                let name = std::str::from_utf8(&name[..name_len]).or_else(Self::invalid_data)?;
                let values = bytemuck::try_cast_slice(values).or_else(Self::invalid_data)?;

                Ok(Self::Data(Payload::Var(VarRef { name, dims, values })))
            }
            other => Self::invalid_kind_byte(other),
        }
    }
}
