use std::fs;
use std::path::PathBuf;

use rpuasm::constants::{BAD_CODE_WORD, COMPAT_JUMP_WORD};
use rpuasm::image::CodeFlags;
use rpuasm::{assemble_file, assemble_source, listing, output, Config, CoreGen};

fn temp_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rpuasm-it-{}-{}", std::process::id(), test));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn boot_program_on_gen0_gets_the_compat_jump() {
    let program = include_str!("../programs/boot.rpu");
    let s = assemble_source(
        Config {
            core: CoreGen::Gen0,
            ..Config::default()
        },
        "boot.rpu",
        program,
    );
    assert_eq!(s.rep.errors, 0);
    assert_eq!(s.rep.warnings, 0);

    // The compatibility jump occupies the default origin and the first
    // real instruction lands right behind it.
    assert_eq!(s.image.get(8).word, COMPAT_JUMP_WORD);
    assert!(!s.image.get(8).flags.contains(CodeFlags::CAN_MAP));
    assert_eq!(s.image.get(9).word, 0x0ae1_e2e2);
    assert_eq!(s.code_offset, 10);

    let dbg = output::build_dbg(&s);
    assert_eq!(dbg.entry_point, 8);
    assert_eq!(dbg.labels.len(), 1);
    assert_eq!(dbg.labels[0].name, "start");
    assert_eq!(dbg.labels[0].addr, 9);
}

#[test]
fn boot_program_on_gen1_warns_and_skips_the_jump() {
    let program = include_str!("../programs/boot.rpu");
    let s = assemble_source(Config::default(), "boot.rpu", program);
    assert_eq!(s.rep.errors, 0);
    assert_eq!(s.rep.warnings, 1);
    assert_eq!(s.image.get(8).word, 0x0ae1_e2e2);
    assert_eq!(s.code_offset, 9);
    assert_eq!(s.labels.get("start"), Some(8));
}

#[test]
fn oversize_parameter_blocks_all_output() {
    let program = format!("mov r1, {}\n", "x".repeat(96));
    let s = assemble_source(Config::default(), "long.rpu", &program);
    assert!(s.rep.errors > 0);
    assert_eq!(s.code_offset, -1);
    assert!(!output::have_output(&s));
}

#[test]
fn duplicate_label_across_included_files() {
    let dir = temp_dir("dup");
    fs::write(
        dir.join("main.rpu"),
        "dup: nop\n.include \"other.rpu\"\n",
    )
    .unwrap();
    fs::write(dir.join("other.rpu"), "dup: nop\n").unwrap();

    let s = assemble_file(Config::default(), &dir.join("main.rpu"));
    assert_eq!(s.rep.errors, 1);
    // The first definition's address is unaffected.
    assert_eq!(s.labels.get("dup"), Some(8));
    assert_eq!(s.sources.files.len(), 2);
    assert!(!output::have_output(&s));
}

#[test]
fn includes_resolve_through_the_search_path() {
    let dir = temp_dir("incdir");
    let libdir = dir.join("lib");
    fs::create_dir_all(&libdir).unwrap();
    fs::write(dir.join("main.rpu"), ".origin 0\n.include \"util.rpu\"\nhalt\n").unwrap();
    fs::write(libdir.join("util.rpu"), "util: nop\n").unwrap();

    let s = assemble_file(
        Config {
            include_dirs: vec![libdir],
            ..Config::default()
        },
        &dir.join("main.rpu"),
    );
    assert_eq!(s.rep.errors, 0);
    assert_eq!(s.labels.get("util"), Some(0));
    assert_eq!(s.code_offset, 2);
    assert_eq!(s.sources.files.len(), 2);
}

#[test]
fn unresolved_symbol_fails_pass_two_with_a_sentinel() {
    let s = assemble_source(Config::default(), "missing.rpu", "jmp nowhere\n");
    assert_eq!(s.rep.errors, 1);
    assert_eq!(s.image.get(8).word, BAD_CODE_WORD);
    assert!(!output::have_output(&s));
}

#[test]
fn directives_alone_produce_no_image() {
    let s = assemble_source(Config::default(), "empty.rpu", ".equ ONLY, 1\n");
    assert_eq!(s.rep.errors, 0);
    assert_eq!(s.code_offset, -1);
    assert!(!output::have_output(&s));
}

#[test]
fn annotated_listing_interleaves_source_and_code() {
    let dir = temp_dir("listing");
    let path = dir.join("count.rpu");
    fs::write(&path, include_str!("../programs/count.rpu")).unwrap();

    let s = assemble_file(Config::default(), &path);
    assert_eq!(s.rep.errors, 0);

    let mut out = Vec::new();
    listing::write_source_listing(&mut out, &s).unwrap();
    let text = String::from_utf8(out).unwrap();
    insta::assert_snapshot!(text.trim_end(), @r###"
    Source File 1 : 'count.rpu' (4 Instructions Generated)

        1 :                   : .origin 0
        2 : 0x0000 0x24e10004 : start: ldi r1, 4
        3 : 0x0001 0x83e1e101 : loop: sub r1, r1, 1
        4 : 0x0002 0xc5ffe100 : qbne loop, r1, 0
        5 : 0x0003 0x2a000000 : halt
    "###);
}

#[test]
fn listing_renders_macro_bodies_unless_disabled() {
    let dir = temp_dir("maclist");
    let path = dir.join("macro.rpu");
    fs::write(&path, include_str!("../programs/macro.rpu")).unwrap();

    let s = assemble_file(Config::default(), &path);
    assert_eq!(s.rep.errors, 0);
    let mut out = Vec::new();
    listing::write_source_listing(&mut out, &s).unwrap();
    let text = String::from_utf8(out).unwrap();
    // Macro-produced words render under the macro's name with the
    // captured body text.
    assert!(text.contains("dec2: 4 : 0x0001 0x83e2e201 : sub reg, reg, 1"));
    assert!(text.contains("dec2: 5 : 0x0002 0x83e2e201 : sub reg, reg, 1"));

    let s = assemble_file(
        Config {
            list_no_macros: true,
            ..Config::default()
        },
        &path,
    );
    let mut out = Vec::new();
    listing::write_source_listing(&mut out, &s).unwrap();
    let text = String::from_utf8(out).unwrap();
    // Folded mode: the words attach to the invocation line directly.
    assert!(!text.contains("dec2: 4"));
    assert!(text.contains("0x0001 0x83e2e201 : dec2 r2"));
}

#[test]
fn label_length_bound_is_exact() {
    let at_bound = "l".repeat(63);
    let s = assemble_source(
        Config::default(),
        "len_ok.rpu",
        &format!(".origin 0\n{}: nop\n", at_bound),
    );
    assert_eq!(s.rep.errors, 0);
    assert_eq!(s.labels.get(&at_bound), Some(0));

    let over = "l".repeat(64);
    let s = assemble_source(
        Config::default(),
        "len_over.rpu",
        &format!(".origin 0\n{}: nop\n", over),
    );
    assert_eq!(s.rep.errors, 1);
    assert_eq!(s.labels.get(&over), None);
}

#[test]
fn repeated_runs_produce_identical_debug_bytes() {
    let program = include_str!("../programs/count.rpu");
    let a = assemble_source(Config::default(), "idem.rpu", program);
    let b = assemble_source(Config::default(), "idem.rpu", program);
    assert_eq!(
        output::build_dbg(&a).to_bytes(),
        output::build_dbg(&b).to_bytes()
    );
}

#[test]
fn struct_fields_assemble_as_register_subfields() {
    let s = assemble_source(
        Config::default(),
        "structs.rpu",
        ".origin 0\n\
         Ctl .struct\n\
         .u32 base\n\
         .u16 len\n\
         .ends\n\
         .assign Ctl, r2, r3, ctl\n\
         ldi ctl.len, 7\n\
         mov r4, ctl.base\n",
    );
    assert_eq!(s.rep.errors, 0);
    // ctl.len lives in r3.w0, ctl.base is all of r2.
    assert_eq!(s.image.get(0).word, 0x2483_0007);
    assert_eq!(s.image.get(1).word, 0x0ae4_e2e2);
}

#[test]
fn debug_database_maps_code_back_to_source() {
    let dir = temp_dir("dbg");
    let path = dir.join("count.rpu");
    fs::write(&path, include_str!("../programs/count.rpu")).unwrap();

    let s = assemble_file(Config::default(), &path);
    assert_eq!(s.rep.errors, 0);

    let dbg = output::build_dbg(&s);
    assert_eq!(dbg.code.len(), 4);
    assert_eq!(dbg.labels.len(), 2);
    assert_eq!(dbg.labels[0].name, "start");
    assert_eq!(dbg.labels[1].name, "loop");
    assert_eq!(dbg.labels[1].addr, 1);
    // Word 2 came from line 4 of the only source file.
    assert_eq!(dbg.code[2].line, 4);
    assert_eq!(dbg.code[2].file_index, 0);

    let parsed = rpudbg::DbgImage::from_bytes(&dbg.to_bytes()).unwrap();
    assert_eq!(parsed, dbg);
}
