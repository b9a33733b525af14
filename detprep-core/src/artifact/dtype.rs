//! Weight dtype widths as stored in graph-model shards.

/// Bytes per element for a manifest dtype, `None` for variable-width or unknown dtypes.
pub fn dtype_size(dtype: &str) -> Option<u64> {
    match dtype {
        "float32" | "int32" | "uint32" => Some(4),
        "float16" | "int16" | "uint16" => Some(2),
        "int8" | "uint8" | "bool" => Some(1),
        "float64" | "int64" | "complex64" => Some(8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_widths() {
        assert_eq!(dtype_size("float32"), Some(4));
        assert_eq!(dtype_size("float16"), Some(2));
        assert_eq!(dtype_size("uint8"), Some(1));
        assert_eq!(dtype_size("complex64"), Some(8));
    }

    #[test]
    fn test_string_has_no_fixed_width() {
        assert_eq!(dtype_size("string"), None);
        assert_eq!(dtype_size("FLOAT32"), None);
    }
}
