use once_cell::sync::OnceCell;
use regex::Regex;

/// Maximum program size in 32-bit instruction words.
pub const MAX_PROGRAM: usize = 16384;

/// Maximum terms on one line, including the command itself.
pub const MAX_TOKENS: usize = 10;

/// Term buffer size; the longest accepted term is one byte shorter.
pub const TOKEN_MAX_LEN: usize = 96;

/// Label buffer size; the longest accepted label is one byte shorter.
pub const LABEL_NAME_LEN: usize = 64;

pub const EQUATE_NAME_LEN: usize = 64;
pub const EQUATE_DATA_LEN: usize = 128;
pub const MAX_CMD_EQUATES: usize = 8;

/// Accumulated-error ceiling; processing aborts once reached.
pub const ERROR_LIMIT: u32 = 25;

/// Bound on directive-synthesized line chains per input line.
pub const MAX_SYNTH_CHAIN: u32 = 16;

/// Bound on nested macro expansion.
pub const MAX_MACRO_DEPTH: u32 = 8;

/// Bound on equate-within-equate resolution.
pub const MAX_EQUATE_DEPTH: u32 = 8;

/// Word address claimed when no `.origin` directive ran.
pub const DEFAULT_ORIGIN: i32 = 8;

/// Gen0 boot compatibility word: `jmp #0x9`, emitted at the default
/// origin to step over itself.
pub const COMPAT_JUMP_WORD: u32 = 0xa000_0009;

/// Code word recorded for an instruction that failed to encode.
pub const BAD_CODE_WORD: u32 = 0xffff_ffff;

pub const PROCESSOR_NAME: &str = "RPU";

static REG_REGEX: OnceCell<Regex> = OnceCell::new();
static NUM_REGEX: OnceCell<Regex> = OnceCell::new();

/// Register operand: `r12`, `R3.w1`, `r0.b2`.
pub fn reg_regex() -> &'static Regex {
    REG_REGEX.get_or_init(|| {
        Regex::new(r"^[rR]([0-9]{1,2})(?:\.([bBwW])([0-9]))?$").expect("Invalid register regex")
    })
}

/// Numeric literal: hex, binary, or decimal.
pub fn num_regex() -> &'static Regex {
    NUM_REGEX.get_or_init(|| {
        Regex::new(r"^(?:0[xX](?P<hex>[0-9a-fA-F]+)|0[bB](?P<bin>[01]+)|(?P<dec>[0-9]+))$")
            .expect("Invalid number regex")
    })
}
