//! # vexel-funcs
//!
//! The built-in function library for vexel expressions: scalar math,
//! range remapping, vector operations, and lattice noise.
//!
//! The library registers into the engine's process-wide function registry.
//! Call [`install`] once during host startup, before any expression is
//! prepped:
//!
//! ```
//! use vexel_expr::Expression;
//!
//! vexel_funcs::install();
//!
//! let mut e = Expression::new("mix(0, 10, smoothstep($t, 0, 1))");
//! # let _ = e;
//! ```

pub mod math;
pub mod noise;
pub mod remap;
pub mod vector;

use std::sync::Once;

use tracing::debug;

use vexel_expr::func::register;
use vexel_expr::{FuncDef, FuncKind};

/// Register every built-in into the process-wide registry. Idempotent.
pub fn install() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(install_all);
}

fn install_all() {
    use FuncKind::*;

    let defs = vec![
        // scalar math, lifted over vectors lane-by-lane
        FuncDef::new("abs", Func1(f64::abs)),
        FuncDef::new("acos", Func1(f64::acos)),
        FuncDef::new("asin", Func1(f64::asin)),
        FuncDef::new("atan", Func1(f64::atan)),
        FuncDef::new("ceil", Func1(f64::ceil)),
        FuncDef::new("cos", Func1(f64::cos)),
        FuncDef::new("cosh", Func1(f64::cosh)),
        FuncDef::new("exp", Func1(f64::exp)),
        FuncDef::new("floor", Func1(f64::floor)),
        FuncDef::new("log", Func1(f64::ln)),
        FuncDef::new("log10", Func1(f64::log10)),
        FuncDef::new("sin", Func1(f64::sin)),
        FuncDef::new("sinh", Func1(f64::sinh)),
        FuncDef::new("sqrt", Func1(f64::sqrt)),
        FuncDef::new("tan", Func1(f64::tan)),
        FuncDef::new("tanh", Func1(f64::tanh)),
        FuncDef::new("trunc", Func1(f64::trunc)),
        FuncDef::new("atan2", Func2(f64::atan2)),
        FuncDef::new("pow", Func2(f64::powf)),
        FuncDef::new("fmod", Func2(math::fmod)),
        // degree-flavored trig
        FuncDef::new("deg", Func1(math::deg)),
        FuncDef::new("rad", Func1(math::rad)),
        FuncDef::new("cosd", Func1(math::cosd)),
        FuncDef::new("sind", Func1(math::sind)),
        FuncDef::new("tand", Func1(math::tand)),
        FuncDef::new("acosd", Func1(math::acosd)),
        FuncDef::new("asind", Func1(math::asind)),
        FuncDef::new("atand", Func1(math::atand)),
        FuncDef::new("atan2d", Func2(math::atan2d)),
        // clamping
        FuncDef::new("clamp", Func3(math::clamp)),
        FuncDef::new("round", Func1(math::round)),
        FuncDef::new("max", Func2(math::max)),
        FuncDef::new("min", Func2(math::min)),
        FuncDef::new("invert", Func1(math::invert)),
        FuncDef::new("hypot", Func2(math::hypot)),
        // blending / remapping
        FuncDef::new("compress", Func3(remap::compress)),
        FuncDef::new("expand", Func3(remap::expand)),
        FuncDef::new("fit", Func5(remap::fit)),
        FuncDef::new("gamma", Func2(remap::gamma)),
        FuncDef::new("bias", Func2(remap::bias)),
        FuncDef::new("contrast", Func2(remap::contrast)),
        FuncDef::new("boxstep", Func2(remap::boxstep)),
        FuncDef::new("linearstep", Func3(remap::linearstep)),
        FuncDef::new("smoothstep", Func3(remap::smoothstep)),
        FuncDef::new("gaussstep", Func3(remap::gaussstep)),
        FuncDef::new("mix", Func3(remap::mix)),
        // variations
        FuncDef::new("cycle", Func3(math::cycle)),
        FuncDef::new("hash", FuncN(math::hash)).with_arity(1, None),
        // vectors
        FuncDef::new("length", Func1V(vector::length)),
        FuncDef::new("dot", Func2V(vector::dot)),
        FuncDef::new("angle", Func2V(vector::angle)),
        FuncDef::new("dist", Func6(vector::dist)),
        FuncDef::new("norm", Func1VV(vector::norm)),
        FuncDef::new("cross", Func2VV(vector::cross)),
        FuncDef::new("ortho", Func2VV(vector::ortho)),
        // noise
        FuncDef::new("noise", FuncNV(noise::noise)).with_arity(1, Some(2)),
        FuncDef::new("snoise", Func1V(noise::snoise)),
        FuncDef::new("vnoise", Func1VV(noise::vnoise)),
        FuncDef::new("cnoise", Func1VV(noise::cnoise)),
        FuncDef::new("fbm", FuncNV(noise::fbm)).with_arity(1, Some(4)),
        FuncDef::new("turbulence", FuncNV(noise::turbulence)).with_arity(1, Some(4)),
        FuncDef::new("vfbm", FuncNVV(noise::vfbm)).with_arity(1, Some(4)),
        FuncDef::new("vturbulence", FuncNVV(noise::vturbulence)).with_arity(1, Some(4)),
        FuncDef::new("cellnoise", Func1V(noise::cellnoise)),
        FuncDef::new("ccellnoise", Func1VV(noise::ccellnoise)),
    ];

    let count = defs.len();
    for def in defs {
        register(def);
    }
    debug!(count, "builtin function library installed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use vexel_expr::func::lookup;
    use vexel_expr::ExprType;

    #[test]
    fn install_registers_the_library() {
        install();
        install(); // idempotent

        for name in [
            "sin", "clamp", "smoothstep", "length", "cross", "noise", "pow", "fmod",
        ] {
            assert!(lookup(name).is_some(), "missing builtin {name}");
        }
    }

    #[test]
    fn shapes_carry_the_right_signatures() {
        install();

        let clamp = lookup("clamp").unwrap();
        assert_eq!(clamp.min_args(), 3);
        assert_eq!(clamp.max_args(), Some(3));
        assert!(clamp.is_scalar_args());
        assert_eq!(clamp.ret_type(), ExprType::FP1);

        let cross = lookup("cross").unwrap();
        assert!(!cross.is_scalar_args());
        assert_eq!(cross.ret_type(), ExprType::FP3);

        let hash = lookup("hash").unwrap();
        assert_eq!(hash.max_args(), None);

        let noise = lookup("noise").unwrap();
        assert_eq!(noise.min_args(), 1);
        assert_eq!(noise.max_args(), Some(2));
        assert_eq!(noise.ret_type(), ExprType::FP1);
    }
}
