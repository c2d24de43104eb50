pub mod message_id {
    //! Deserialization of JSON RPC message IDs.
    //!
    //! Some peer implementations serialize request IDs as floating point
    //! numbers with a zero fractional part, or as decimal strings. Inbound
    //! parsing accepts all three shapes. Outbound serialization always emits
    //! an integer.

    use serde::{de::Error, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumericId {
        Int(u64),
        Float(f64),
        Str(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match NumericId::deserialize(deserializer)? {
            NumericId::Int(val) => Ok(val),

            NumericId::Float(val) => {
                if val >= 0.0 && val <= u64::MAX as f64 && val.fract() == 0.0 {
                    Ok(val as u64)
                } else {
                    Err(Error::custom(format!(
                        "message ID is not an integral number: {val}"
                    )))
                }
            }

            NumericId::Str(val) => val.parse().map_err(Error::custom),
        }
    }
}
