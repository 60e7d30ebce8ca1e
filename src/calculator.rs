//! The calculator contract and its square-root handler.
//!
//! Schema:
//!
//! ```text
//! message Number { optional float value = 1; }
//! service Calculator { rpc SquareRoot(Number) returns (Number); }
//! ```

use crate::{message, service, Status};

message! {
    /// A single numeric value, used as both request and response.
    pub struct Number {
        pub optional value: f32 = 1,
    }
}

service! {
    /// Handler side of the calculator contract.
    pub service Calculator {
        descriptor: CALCULATOR_SERVICE;
        server: CalculatorServer;
        client: CalculatorClient;

        /// Returns the square root of `request.value`.
        rpc SquareRoot(Number) returns (Number) as square_root;
    }
}

impl From<f32> for Number {
    fn from(value: f32) -> Self {
        Self { value }
    }
}

/// The domain computation.
pub fn square_root(x: f32) -> f32 {
    x.sqrt()
}

/// Serves [`square_root`], rejecting inputs it is undefined for.
#[derive(Debug, Default, Clone, Copy)]
pub struct SquareRootCalculator;

impl Calculator for SquareRootCalculator {
    fn square_root(&self, request: Number) -> Result<Number, Status> {
        let x = request.value;
        if x.is_nan() {
            return Err(Status::invalid_argument("input is not a number"));
        }
        if x < 0.0 {
            return Err(Status::invalid_argument("negative input"));
        }
        Ok(Number::from(square_root(x)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{status::Code, Message};

    fn n(value: f32) -> Number {
        Number { value }
    }

    #[test]
    fn computes_square_roots() {
        let calc = SquareRootCalculator;
        assert_eq!(calc.square_root(n(100.0)).unwrap().value, 10.0);
        assert_eq!(calc.square_root(n(0.0)).unwrap().value, 0.0);
        assert_eq!(
            calc.square_root(n(f32::INFINITY)).unwrap().value,
            f32::INFINITY
        );
    }

    #[test]
    fn rejects_negative_and_nan() {
        let calc = SquareRootCalculator;
        let status = calc.square_root(n(-4.0)).unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "negative input");

        let status = calc.square_root(n(f32::NAN)).unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[test]
    fn contract_shape() {
        assert_eq!(CALCULATOR_SERVICE.name, "Calculator");
        let method = CALCULATOR_SERVICE.method("SquareRoot").unwrap();
        assert_eq!(method.input, Number::DESCRIPTOR);
        assert_eq!(method.output, Number::DESCRIPTOR);
        assert_eq!(Number::DESCRIPTOR.field(1).unwrap().name, "value");
    }
}
