//! User pixel formulas.
//!
//! A formula is one expression per output band, separated by `;`, over band
//! variables `A`, `B`, `C`, ... in band order. Supported: arithmetic
//! `+ - * /`, unary minus, comparisons `> >= < <= == !=` (producing 1/0),
//! and boolean `&` / `|` over non-zero-ness. Expressions are parsed into an
//! AST and interpreted elementwise; user input is never compiled or executed
//! as host code.
use ndarray::Array2;

use crate::core::raster::{Band, BandStack};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    fn binding_power(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Gt | BinOp::Ge | BinOp::Lt | BinOp::Le | BinOp::Eq | BinOp::Ne => 3,
            BinOp::Add | BinOp::Sub => 4,
            BinOp::Mul | BinOp::Div => 5,
        }
    }

    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Gt => (a > b) as u8 as f64,
            BinOp::Ge => (a >= b) as u8 as f64,
            BinOp::Lt => (a < b) as u8 as f64,
            BinOp::Le => (a <= b) as u8 as f64,
            BinOp::Eq => (a == b) as u8 as f64,
            BinOp::Ne => (a != b) as u8 as f64,
            BinOp::And => (a != 0.0 && b != 0.0) as u8 as f64,
            BinOp::Or => (a != 0.0 || b != 0.0) as u8 as f64,
        }
    }
}

#[derive(Clone, Debug)]
enum Expr {
    Num(f64),
    Band(usize),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, at: &impl Fn(usize) -> f64) -> f64 {
        match self {
            Expr::Num(v) => *v,
            Expr::Band(i) => at(*i),
            Expr::Neg(e) => -e.eval(at),
            Expr::Bin(op, a, b) => op.apply(a.eval(at), b.eval(at)),
        }
    }

    fn collect_bands(&self, out: &mut Vec<usize>) {
        match self {
            Expr::Num(_) => {}
            Expr::Band(i) => {
                if !out.contains(i) {
                    out.push(*i);
                }
            }
            Expr::Neg(e) => e.collect_bands(out),
            Expr::Bin(_, a, b) => {
                a.collect_bands(out);
                b.collect_bands(out);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token {
    Num(f64),
    Band(usize),
    Op(BinOp),
    Minus,
    Plus,
    LParen,
    RParen,
}

/// A parsed, reusable pixel formula.
#[derive(Clone, Debug)]
pub struct Formula {
    source: String,
    exprs: Vec<Expr>,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Formula> {
        let mut exprs = Vec::new();
        for part in source.split(';') {
            let part = part.trim();
            if part.is_empty() {
                return Err(err(source, "empty expression"));
            }
            let tokens = tokenize(source, part)?;
            let mut parser = Parser {
                source,
                tokens: &tokens,
                pos: 0,
            };
            let expr = parser.parse_expr(0)?;
            if parser.pos != tokens.len() {
                return Err(err(source, "unexpected trailing input"));
            }
            exprs.push(expr);
        }
        Ok(Formula {
            source: source.to_string(),
            exprs,
        })
    }

    /// Number of bands the formula produces.
    pub fn band_count(&self) -> usize {
        self.exprs.len()
    }

    /// Highest band index referenced, if any band is referenced at all.
    pub fn max_band(&self) -> Option<usize> {
        let mut bands = Vec::new();
        for e in &self.exprs {
            e.collect_bands(&mut bands);
        }
        bands.into_iter().max()
    }

    /// Evaluate the formula over a window's band stack. The validity of each
    /// output pixel is the conjunction of the validities of the bands its
    /// expression references.
    pub fn apply(&self, stack: &BandStack) -> Result<BandStack> {
        if let Some(max) = self.max_band() {
            if max >= stack.band_count() {
                return Err(err(
                    &self.source,
                    &format!(
                        "references band {} but the source has {} band(s)",
                        (b'A' + max as u8) as char,
                        stack.band_count()
                    ),
                ));
            }
        }
        let (rows, cols) = stack.shape();
        let mut out = Vec::with_capacity(self.exprs.len());
        for expr in &self.exprs {
            let mut used = Vec::new();
            expr.collect_bands(&mut used);

            let mut data = Array2::<f64>::zeros((rows, cols));
            let mut valid = Array2::<bool>::from_elem((rows, cols), true);
            for ((r, c), px) in data.indexed_iter_mut() {
                *px = expr.eval(&|i| stack.bands[i].data[[r, c]]);
                if !used.iter().all(|&i| stack.bands[i].valid[[r, c]]) {
                    valid[[r, c]] = false;
                }
            }
            out.push(Band::new(data, valid));
        }
        Ok(BandStack::new(out))
    }
}

fn err(source: &str, reason: &str) -> Error {
    Error::Formula {
        formula: source.to_string(),
        reason: reason.to_string(),
    }
}

fn tokenize(source: &str, part: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = part.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op(BinOp::Mul));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op(BinOp::Div));
                i += 1;
            }
            '&' => {
                tokens.push(Token::Op(BinOp::And));
                i += 1;
            }
            '|' => {
                tokens.push(Token::Op(BinOp::Or));
                i += 1;
            }
            '>' | '<' | '=' | '!' => {
                let two = bytes.get(i + 1) == Some(&b'=');
                let op = match (c, two) {
                    ('>', true) => BinOp::Ge,
                    ('>', false) => BinOp::Gt,
                    ('<', true) => BinOp::Le,
                    ('<', false) => BinOp::Lt,
                    ('=', true) => BinOp::Eq,
                    ('!', true) => BinOp::Ne,
                    _ => return Err(err(source, &format!("unexpected character `{}`", c))),
                };
                tokens.push(Token::Op(op));
                i += if two { 2 } else { 1 };
            }
            'A'..='Z' => {
                tokens.push(Token::Band((c as u8 - b'A') as usize));
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let num: f64 = part[start..i]
                    .parse()
                    .map_err(|_| err(source, &format!("bad number `{}`", &part[start..i])))?;
                tokens.push(Token::Num(num));
            }
            _ => return Err(err(source, &format!("unexpected character `{}`", c))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).copied();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr> {
        let mut lhs = self.parse_prefix()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op)) => op,
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            let bp = op.binding_power();
            if bp < min_bp {
                break;
            }
            self.next();
            let rhs = self.parse_expr(bp + 1)?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Num(v)) => Ok(Expr::Num(v)),
            Some(Token::Band(i)) => Ok(Expr::Band(i)),
            Some(Token::Minus) => Ok(Expr::Neg(Box::new(self.parse_prefix()?))),
            Some(Token::Plus) => self.parse_prefix(),
            Some(Token::LParen) => {
                let e = self.parse_expr(0)?;
                match self.next() {
                    Some(Token::RParen) => Ok(e),
                    _ => Err(err(self.source, "missing closing parenthesis")),
                }
            }
            other => Err(err(
                self.source,
                &format!("expected value, found {:?}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::raster::fill_nodata;
    use crate::core::tile::NoData;
    use ndarray::array;

    fn stack(values: Vec<f64>, masked: Vec<u8>) -> BandStack {
        let n = values.len();
        let data = Array2::from_shape_vec((1, n), values).unwrap();
        let valid = Array2::from_shape_vec((1, n), masked.iter().map(|&m| m == 0).collect())
            .unwrap();
        BandStack::new(vec![Band::new(data, valid)])
    }

    #[test]
    fn masked_increment_then_fill() {
        // A+1 over [1..10] with mask [0,0,0,1,1,1,0,0,0,1], nodata 0.
        let s = stack(
            (1..=10).map(|v| v as f64).collect(),
            vec![0, 0, 0, 1, 1, 1, 0, 0, 0, 1],
        );
        let f = Formula::parse("A+1").unwrap();
        let out = f.apply(&s).unwrap();
        let filled = fill_nodata(&out.bands[0], 0, Some(&NoData::Single(0.0)));
        assert_eq!(
            filled,
            array![[2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 8.0, 9.0, 10.0, 0.0]]
        );
    }

    #[test]
    fn precedence_and_parentheses() {
        let s = stack(vec![10.0], vec![0]);
        let cases = [
            ("A+2*3", 16.0),
            ("(A+2)*3", 36.0),
            ("-A+1", -9.0),
            ("A/4", 2.5),
            ("A-2-3", 5.0),
        ];
        for (expr, expected) in cases {
            let f = Formula::parse(expr).unwrap();
            let out = f.apply(&s).unwrap();
            assert_eq!(out.bands[0].data[[0, 0]], expected, "{}", expr);
        }
    }

    #[test]
    fn comparisons_and_boolean_coercion() {
        let s = stack(vec![5.0], vec![0]);
        let cases = [
            ("A>4", 1.0),
            ("A>=6", 0.0),
            ("A==5", 1.0),
            ("A!=5", 0.0),
            ("(A>0)&(A<4)", 0.0),
            ("(A>0)|(A<4)", 1.0),
            ("(A>3)*255", 255.0),
        ];
        for (expr, expected) in cases {
            let f = Formula::parse(expr).unwrap();
            let out = f.apply(&s).unwrap();
            assert_eq!(out.bands[0].data[[0, 0]], expected, "{}", expr);
        }
    }

    #[test]
    fn multi_band_output() {
        let s = BandStack::new(vec![
            Band::all_valid(array![[1.0]]),
            Band::all_valid(array![[2.0]]),
        ]);
        let f = Formula::parse("A+B; A*B").unwrap();
        assert_eq!(f.band_count(), 2);
        let out = f.apply(&s).unwrap();
        assert_eq!(out.bands[0].data[[0, 0]], 3.0);
        assert_eq!(out.bands[1].data[[0, 0]], 2.0);
    }

    #[test]
    fn validity_follows_referenced_bands_only() {
        let a = Band::new(array![[1.0, 1.0]], array![[true, false]]);
        let b = Band::new(array![[2.0, 2.0]], array![[false, true]]);
        let s = BandStack::new(vec![a, b]);

        let f = Formula::parse("B*2").unwrap();
        let out = f.apply(&s).unwrap();
        // Band A's mask must not leak into a formula that never reads A.
        assert_eq!(out.bands[0].valid, array![[false, true]]);
    }

    #[test]
    fn malformed_formulas_rejected() {
        for expr in ["A +", "1 +* 2", "(A", "A ! 2", "", "A $ B"] {
            assert!(Formula::parse(expr).is_err(), "{:?} should fail", expr);
        }
    }

    #[test]
    fn referencing_missing_band_fails() {
        let s = stack(vec![1.0], vec![0]);
        let f = Formula::parse("B+1").unwrap();
        assert!(f.apply(&s).is_err());
    }
}
