/// A request about to be sent to an LLM backend, described only by what the
/// limiter needs: how much text goes in, and the caller's output cap.
#[derive(Debug, Clone, Copy)]
pub struct RequestSpec {
    pub message_chars: u64,
    pub max_tokens: u32,
}

/// Estimated input/output/total token cost of a request, per spec 4.5:
/// `inputs = ceil(chars / 4)`, `outputs = min(max_tokens, ceil(inputs * 1.2))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenEstimate {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

pub fn estimate_tokens(spec: &RequestSpec) -> TokenEstimate {
    let input_tokens = spec.message_chars.div_ceil(4);
    let projected_output = (input_tokens as f64 * 1.2).ceil() as u64;
    let output_tokens = projected_output.min(spec.max_tokens as u64);
    TokenEstimate {
        input_tokens,
        output_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_input_and_capped_output() {
        let spec = RequestSpec {
            message_chars: 400,
            max_tokens: 50,
        };
        let estimate = estimate_tokens(&spec);
        assert_eq!(estimate.input_tokens, 100);
        assert_eq!(estimate.output_tokens, 50); // 120 projected, capped at max_tokens
        assert_eq!(estimate.total(), 150);
    }

    #[test]
    fn output_uses_projection_when_under_the_cap() {
        let spec = RequestSpec {
            message_chars: 40,
            max_tokens: 1000,
        };
        let estimate = estimate_tokens(&spec);
        assert_eq!(estimate.input_tokens, 10);
        assert_eq!(estimate.output_tokens, 12); // ceil(10 * 1.2) = 12
    }
}
