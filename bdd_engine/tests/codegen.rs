mod utils;

use bdd_engine_lib::bdd::Bdd;
use bdd_engine_lib::codegen::{generate_init, generate_process};
use bdd_engine_lib::Config;
use bdd_ir::Array;
use utils::{builder, call, eval_toolbox, path};

#[test]
fn init_allocation_failure_branch_lowers_to_c() {
    let toolbox = eval_toolbox();
    let config = Config::default();
    let b = builder();

    // The allocator's status is symbolic; one path continues to the commit
    // boundary, the other ends right after the failed allocation.
    let status = Array::new("map_allocation_succeeded", 32, 8, 4);
    let status_read = b.zext(b.read(status, b.constant(32, 0), 8), 32);
    let failed = b.eq(b.constant(32, 0), status_read.clone());

    let mut allocate = call("map_allocate");
    allocate.args.insert(
        "capacity".to_string(),
        bdd_ir::call_path::Arg {
            expr: Some(b.constant(32, 65536)),
            ..Default::default()
        },
    );
    allocate.args.insert(
        "map_out".to_string(),
        bdd_ir::call_path::Arg {
            expr: None,
            before: Some(b.constant(64, 0)),
            after: Some(b.constant(64, 1)),
        },
    );
    allocate.ret = Some(status_read.clone());

    let success_path = path(
        "success.call_path",
        vec![b.not(failed.clone())],
        vec![allocate.clone(), call("start_time")],
    );
    let failure_path = path("failure.call_path", vec![failed], vec![allocate]);

    let bdd = Bdd::from_call_paths(vec![success_path, failure_path], &toolbox, &config);
    let unit = generate_init(&bdd, &config).unwrap();
    let rendered = unit.render();

    assert!(rendered.contains("#include <stdint.h>"));
    assert!(rendered.contains("#include \"libvig/verified/map.h\""));
    assert!(rendered.contains("uint32_t capacity;"));
    assert!(rendered.contains("struct Map* map;"));
    assert!(rendered.contains("bool nf_init(void) {"));
    assert!(
        rendered.contains("int map_allocation_succeeded = map_allocate(capacity, &map);"),
        "allocation statement missing from:\n{}",
        rendered
    );
    // The success arm reaches the commit boundary; the failure arm returns
    // the failed status.
    assert!(rendered.contains("return 1;"));
    assert!(rendered.contains("return 0;"));
    // The branch keeps its condition as a trailing comment.
    assert!(rendered.contains("} // "));
}

#[test]
fn unrecognized_init_call_is_fatal() {
    let toolbox = eval_toolbox();
    let config = Config::default();

    let p = path("p.call_path", vec![], vec![call("cht_fill_cht")]);
    let bdd = Bdd::from_call_paths(vec![p], &toolbox, &config);

    let err = generate_init(&bdd, &config).unwrap_err();
    assert!(format!("{:#}", err).contains("not implemented"));
}

#[test]
fn process_generation_is_a_stub() {
    let toolbox = eval_toolbox();
    let config = Config::default();

    let p = path("p.call_path", vec![], vec![call("start_time")]);
    let bdd = Bdd::from_call_paths(vec![p], &toolbox, &config);

    assert!(generate_process(&bdd, &config).is_err());
}
