//! Schema-driven message encoding.
//!
//! A message travels as a bincode list of `(field id, value)` pairs sorted by
//! id. Decoding keeps only the ids the receiving schema declares, so peers
//! built against newer or older schemas still understand each other as long
//! as ids are never reused.

use crate::{
    schema::{FieldSet, Label, Message},
    types::{Type, TypeMismatch, Value},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug)]
struct WireField {
    id: u32,
    value: Value,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed {message} bytes: {source}")]
    Malformed {
        message: &'static str,
        #[source]
        source: bincode::Error,
    },

    #[error("field {id}: {source}")]
    FieldType {
        id: u32,
        #[source]
        source: TypeMismatch,
    },

    #[error("{message} is missing required field `{field}`")]
    MissingField {
        message: &'static str,
        field: &'static str,
    },

    #[error("{message} declares field id {id} more than once")]
    DuplicateId { message: &'static str, id: u32 },
}

#[derive(Debug, Error)]
pub enum SchemaViolation {
    #[error("{message} is missing required field `{field}`")]
    MissingRequired {
        message: &'static str,
        field: &'static str,
    },

    #[error("{message} has no field with id {id}")]
    UndeclaredField { message: &'static str, id: u32 },

    #[error("{message} declares field id {id} more than once")]
    DuplicateId { message: &'static str, id: u32 },

    #[error("{message}.{field} expects {expected}, got {found}")]
    TypeMismatch {
        message: &'static str,
        field: &'static str,
        expected: Type,
        found: Type,
    },

    #[error("{message} could not be serialized: {source}")]
    Unserializable {
        message: &'static str,
        #[source]
        source: bincode::Error,
    },
}

pub fn encode<M: Message>(message: &M) -> Result<Vec<u8>, SchemaViolation> {
    let descriptor = M::DESCRIPTOR;
    if let Some(id) = descriptor.duplicate_id() {
        return Err(SchemaViolation::DuplicateId {
            message: descriptor.name,
            id,
        });
    }
    let mut wire = Vec::new();

    for (id, value) in message.to_fields() {
        let field = descriptor
            .field(id)
            .ok_or(SchemaViolation::UndeclaredField {
                message: descriptor.name,
                id,
            })?;
        match value {
            Some(value) if value.typ() != field.ty => {
                return Err(SchemaViolation::TypeMismatch {
                    message: descriptor.name,
                    field: field.name,
                    expected: field.ty,
                    found: value.typ(),
                })
            }
            Some(value) => wire.push(WireField { id, value }),
            None => {}
        }
    }

    for field in descriptor.required() {
        if !wire.iter().any(|present| present.id == field.id) {
            return Err(SchemaViolation::MissingRequired {
                message: descriptor.name,
                field: field.name,
            });
        }
    }

    wire.sort_by_key(|field| field.id);
    bincode::serialize(&wire).map_err(|source| SchemaViolation::Unserializable {
        message: descriptor.name,
        source,
    })
}

pub fn decode<M: Message>(bytes: &[u8]) -> Result<M, CodecError> {
    let descriptor = M::DESCRIPTOR;
    if let Some(id) = descriptor.duplicate_id() {
        return Err(CodecError::DuplicateId {
            message: descriptor.name,
            id,
        });
    }
    let wire: Vec<WireField> =
        bincode::deserialize(bytes).map_err(|source| CodecError::Malformed {
            message: descriptor.name,
            source,
        })?;

    let mut fields = FieldSet::default();
    for WireField { id, value } in wire {
        match descriptor.field(id) {
            Some(field) if value.typ() != field.ty => {
                return Err(CodecError::FieldType {
                    id,
                    source: TypeMismatch::new(value, field.ty),
                })
            }
            Some(_) => fields.insert(id, value),
            None => tracing::trace!(schema = descriptor.name, id, "ignoring unknown field"),
        }
    }

    for field in descriptor.required() {
        if !fields.contains(field.id) {
            return Err(CodecError::MissingField {
                message: descriptor.name,
                field: field.name,
            });
        }
    }

    M::from_fields(&mut fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        calculator::Number,
        message,
        schema::{FieldDescriptor, MessageDescriptor},
        types::FieldValue,
    };

    message! {
        struct Reading {
            required celsius: Option<f32> = 1,
            optional station: String = 2,
            optional samples: Option<i64> = 3,
        }
    }

    // A later revision of `Number` that grew a second field.
    message! {
        struct NumberV2 {
            optional value: f32 = 1,
            optional unit: String = 7,
        }
    }

    // Written by hand: `message!` refuses to compile a reused id.
    #[derive(Debug, Default, PartialEq)]
    struct Clash {
        low: f32,
        high: f32,
    }

    impl Message for Clash {
        const DESCRIPTOR: &'static MessageDescriptor = &MessageDescriptor {
            name: "Clash",
            fields: &[
                FieldDescriptor {
                    name: "low",
                    id: 4,
                    ty: Type::Float,
                    label: Label::Optional,
                },
                FieldDescriptor {
                    name: "high",
                    id: 4,
                    ty: Type::Float,
                    label: Label::Optional,
                },
            ],
        };

        fn to_fields(&self) -> Vec<(u32, Option<Value>)> {
            vec![(4, self.low.to_value()), (4, self.high.to_value())]
        }

        fn from_fields(fields: &mut FieldSet) -> Result<Self, CodecError> {
            Ok(Self {
                low: fields.take(4)?,
                high: fields.take(4)?,
            })
        }
    }

    #[test]
    fn round_trips_values() {
        for value in [0.0, 100.0, -4.0, f32::MAX, f32::MIN_POSITIVE, f32::INFINITY] {
            let number = Number { value };
            let decoded: Number = decode(&encode(&number).unwrap()).unwrap();
            assert_eq!(decoded, number);
        }

        let reading = Reading {
            celsius: Some(21.5),
            station: "roof".into(),
            samples: None,
        };
        let decoded: Reading = decode(&encode(&reading).unwrap()).unwrap();
        assert_eq!(decoded, reading);
    }

    #[test]
    fn encoding_is_deterministic() {
        let number = Number { value: 3.25 };
        assert_eq!(encode(&number).unwrap(), encode(&number).unwrap());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let newer = NumberV2 {
            value: 9.0,
            unit: "m".into(),
        };
        let older: Number = decode(&encode(&newer).unwrap()).unwrap();
        assert_eq!(older, Number { value: 9.0 });
    }

    #[test]
    fn absent_fields_take_defaults() {
        let empty = bincode::serialize(&Vec::<WireField>::new()).unwrap();
        let number: Number = decode(&empty).unwrap();
        assert_eq!(number, Number { value: 0.0 });
    }

    #[test]
    fn encode_rejects_missing_required_field() {
        let reading = Reading {
            celsius: None,
            ..Reading::default()
        };
        let err = encode(&reading).unwrap_err();
        assert!(matches!(
            err,
            SchemaViolation::MissingRequired {
                field: "celsius",
                ..
            }
        ));
    }

    #[test]
    fn decode_rejects_missing_required_field() {
        let wire = vec![WireField {
            id: 2,
            value: Value::String("roof".into()),
        }];
        let err = decode::<Reading>(&bincode::serialize(&wire).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            CodecError::MissingField {
                field: "celsius",
                ..
            }
        ));
    }

    #[test]
    fn decode_rejects_malformed_bytes() {
        for bytes in [&b""[..], &b"\xff\xff\xff"[..], &[0xff; 9][..]] {
            let err = decode::<Number>(bytes).unwrap_err();
            assert!(matches!(err, CodecError::Malformed { .. }), "{err}");
        }
    }

    #[test]
    fn decode_rejects_wrong_field_type() {
        let wire = vec![WireField {
            id: 1,
            value: Value::String("ten".into()),
        }];
        let err = decode::<Number>(&bincode::serialize(&wire).unwrap()).unwrap_err();
        assert!(matches!(err, CodecError::FieldType { id: 1, .. }));
    }

    #[test]
    fn reused_field_ids_are_rejected() {
        assert_eq!(Clash::DESCRIPTOR.duplicate_id(), Some(4));
        assert_eq!(Reading::DESCRIPTOR.duplicate_id(), None);

        let err = encode(&Clash {
            low: 1.0,
            high: 2.0,
        })
        .unwrap_err();
        assert!(
            matches!(err, SchemaViolation::DuplicateId { id: 4, .. }),
            "{err}"
        );

        let wire = vec![WireField {
            id: 4,
            value: Value::Float(2.0),
        }];
        let err = decode::<Clash>(&bincode::serialize(&wire).unwrap()).unwrap_err();
        assert!(matches!(err, CodecError::DuplicateId { id: 4, .. }), "{err}");
    }
}
