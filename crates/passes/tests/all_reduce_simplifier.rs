use collopt_ir::{
    BinOp, CollectiveAttrs, CompId, ExecutionThreads, InstId, InstructionKind, IrError, Literal,
    MAIN_THREAD, Module, ModuleConfig, NewInstruction, Opcode, PrimitiveType, ReplicaGroup, Shape,
    verify_module,
};
use collopt_passes::{AllReduceSimplifier, PassError, ReplicationError, ReplicationOracle};
use rand::{Rng, SeedableRng, rngs::SmallRng, seq::SliceRandom};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Answers every replication query the same way.
struct FixedOracle(bool);

impl ReplicationOracle for FixedOracle {
    fn is_replicated_at(&self, _inst: InstId, _index: &[usize]) -> bool {
        self.0
    }
}

struct AllReduceModule {
    module: Module,
    entry: CompId,
    x: InstId,
    all_reduce: InstId,
}

/// Build `ROOT all-reduce(x)` over a parameter `x` of the given shape.
fn all_reduce_module(
    replica_count: usize,
    shape: Shape,
    reducer: BinOp,
    attrs: CollectiveAttrs,
) -> AllReduceModule {
    let mut module = Module::new("test", ModuleConfig::with_replicas(replica_count));
    let element_type = shape.element_type().unwrap();
    let to_apply = module
        .add_binary_reducer("reducer", reducer, element_type)
        .unwrap();
    let entry = module.add_computation("entry", MAIN_THREAD);
    module.set_entry(entry).unwrap();

    let x = module
        .add_instruction(entry, NewInstruction::parameter(0, shape.clone()))
        .unwrap();
    let all_reduce = module
        .add_instruction(
            entry,
            NewInstruction::all_reduce(shape, [x], to_apply, attrs),
        )
        .unwrap();
    module.set_root(entry, all_reduce).unwrap();

    AllReduceModule {
        module,
        entry,
        x,
        all_reduce,
    }
}

fn run(module: &mut Module, replicated: bool) -> bool {
    let simplifier = AllReduceSimplifier::for_module(module);
    let changed = simplifier
        .run_with_oracle(module, &ExecutionThreads::all(), &FixedOracle(replicated))
        .unwrap();
    verify_module(module).unwrap();
    changed
}

fn f32_4() -> Shape {
    Shape::array(PrimitiveType::F32, [4])
}

#[test]
fn replicated_sum_becomes_multiply() {
    init_logging();

    let AllReduceModule {
        mut module,
        entry,
        x,
        all_reduce,
    } = all_reduce_module(8, f32_4(), BinOp::Add, CollectiveAttrs::default());

    assert!(run(&mut module, true));
    assert!(!module.contains(all_reduce));

    let root = module.instruction(module.root(entry).unwrap());
    assert_eq!(root.kind, InstructionKind::Binary(BinOp::Multiply));
    assert_eq!(root.shape, f32_4());
    assert_eq!(root.operands[0], x);

    let broadcast = module.instruction(root.operands[1]);
    assert_eq!(
        broadcast.kind,
        InstructionKind::Broadcast {
            dimensions: Vec::new()
        }
    );
    assert_eq!(broadcast.shape, f32_4());

    let convert = module.instruction(broadcast.operands[0]);
    assert_eq!(convert.opcode(), Opcode::Convert);
    assert_eq!(convert.shape, Shape::scalar(PrimitiveType::F32));

    let constant = module.instruction(convert.operands[0]);
    assert_eq!(constant.kind, InstructionKind::Constant(Literal::S32(8)));
}

#[test]
fn replicated_idempotent_reductions_become_operand() {
    init_logging();

    let cases = [
        (BinOp::Maximum, PrimitiveType::F32),
        (BinOp::Minimum, PrimitiveType::F32),
        (BinOp::Or, PrimitiveType::Pred),
        (BinOp::And, PrimitiveType::U32),
    ];

    for (reducer, element_type) in cases {
        let AllReduceModule {
            mut module,
            entry,
            x,
            all_reduce,
        } = all_reduce_module(
            8,
            Shape::array(element_type, [4]),
            reducer,
            CollectiveAttrs::default(),
        );
        let instruction_count = module.instruction_count();

        assert!(run(&mut module, true));
        assert_eq!(module.root(entry).unwrap(), x);
        assert!(!module.contains(all_reduce));
        assert_eq!(module.instruction_count(), instruction_count - 1);
    }
}

#[test]
fn single_replica_groups_are_removed_regardless_of_replication() {
    init_logging();

    let AllReduceModule {
        mut module,
        entry,
        x,
        ..
    } = all_reduce_module(
        8,
        f32_4(),
        BinOp::Add,
        CollectiveAttrs::cross_replica([ReplicaGroup::new([0])]),
    );
    assert!(run(&mut module, false));
    assert_eq!(module.root(entry).unwrap(), x);

    // Even an unrecognized reducer can not change a single value.
    let AllReduceModule {
        mut module,
        entry,
        x,
        ..
    } = all_reduce_module(1, f32_4(), BinOp::Subtract, CollectiveAttrs::default());
    assert!(run(&mut module, false));
    assert_eq!(module.root(entry).unwrap(), x);
}

#[test]
fn scalar_sum_is_not_broadcast() {
    init_logging();

    let AllReduceModule {
        mut module,
        entry,
        x,
        ..
    } = all_reduce_module(
        4,
        Shape::scalar(PrimitiveType::F64),
        BinOp::Add,
        CollectiveAttrs::cross_replica([ReplicaGroup::new([0, 1]), ReplicaGroup::new([2, 3])]),
    );

    assert!(run(&mut module, true));

    let root = module.instruction(module.root(entry).unwrap());
    assert_eq!(root.opcode(), Opcode::Multiply);
    assert_eq!(root.operands[0], x);

    let convert = module.instruction(root.operands[1]);
    assert_eq!(convert.opcode(), Opcode::Convert);
    assert_eq!(convert.shape, Shape::scalar(PrimitiveType::F64));
    assert_eq!(
        module.instruction(convert.operands[0]).kind,
        InstructionKind::Constant(Literal::S32(2))
    );
}

#[test]
fn unreplicated_operands_are_kept() {
    init_logging();

    let AllReduceModule {
        mut module,
        entry,
        all_reduce,
        ..
    } = all_reduce_module(8, f32_4(), BinOp::Add, CollectiveAttrs::default());

    assert!(!run(&mut module, false));
    assert_eq!(module.root(entry).unwrap(), all_reduce);
}

#[test]
fn unrecognized_reducers_are_kept() {
    init_logging();

    for reducer in [BinOp::Multiply, BinOp::Xor, BinOp::Subtract] {
        let AllReduceModule {
            mut module,
            entry,
            all_reduce,
            ..
        } = all_reduce_module(
            8,
            Shape::array(PrimitiveType::S32, [4]),
            reducer,
            CollectiveAttrs::default(),
        );

        assert!(!run(&mut module, true));
        assert_eq!(module.root(entry).unwrap(), all_reduce);
    }
}

#[test]
fn channel_all_reduces_are_kept() {
    init_logging();

    for attrs in [
        CollectiveAttrs::with_channel(1, Vec::new(), false),
        CollectiveAttrs::with_channel(2, [ReplicaGroup::new([0])], true),
    ] {
        let AllReduceModule {
            mut module,
            entry,
            all_reduce,
            ..
        } = all_reduce_module(8, f32_4(), BinOp::Maximum, attrs);

        assert!(!run(&mut module, true));
        assert_eq!(module.root(entry).unwrap(), all_reduce);
    }
}

#[test]
fn non_uniform_groups_are_kept() {
    init_logging();

    let AllReduceModule {
        mut module,
        entry,
        all_reduce,
        ..
    } = all_reduce_module(
        4,
        f32_4(),
        BinOp::Add,
        CollectiveAttrs::cross_replica([ReplicaGroup::new([0, 1, 2]), ReplicaGroup::new([3])]),
    );

    assert!(!run(&mut module, true));
    assert_eq!(module.root(entry).unwrap(), all_reduce);
}

#[test]
fn tuple_all_reduces_are_kept() {
    init_logging();

    let mut module = Module::new("test", ModuleConfig::with_replicas(1));
    let sum = module
        .add_binary_reducer("sum", BinOp::Add, PrimitiveType::F32)
        .unwrap();
    let entry = module.add_computation("entry", MAIN_THREAD);
    let x = module
        .add_instruction(entry, NewInstruction::replicated_parameter(0, f32_4()))
        .unwrap();
    let y = module
        .add_instruction(entry, NewInstruction::replicated_parameter(1, f32_4()))
        .unwrap();
    let all_reduce = module
        .add_instruction(
            entry,
            NewInstruction::all_reduce(
                Shape::tuple([f32_4(), f32_4()]),
                [x, y],
                sum,
                CollectiveAttrs::default(),
            ),
        )
        .unwrap();
    let first = module
        .add_instruction(entry, NewInstruction::get_tuple_element(f32_4(), all_reduce, 0))
        .unwrap();
    module.set_root(entry, first).unwrap();

    assert!(!run(&mut module, true));
    assert!(module.contains(all_reduce));

    let simplifier = AllReduceSimplifier::for_module(&module);
    assert!(
        !simplifier
            .run(&mut module, &ExecutionThreads::all())
            .unwrap()
    );
}

#[test]
fn degenerate_gathers_and_scatters_are_removed() {
    init_logging();

    let mut module = Module::new("test", ModuleConfig::with_replicas(4));
    let sum = module
        .add_binary_reducer("sum", BinOp::Add, PrimitiveType::F32)
        .unwrap();
    let entry = module.add_computation("entry", MAIN_THREAD);
    let x = module
        .add_instruction(entry, NewInstruction::parameter(0, f32_4()))
        .unwrap();
    let gather = module
        .add_instruction(
            entry,
            NewInstruction::all_gather(f32_4(), [x], 0, CollectiveAttrs::default()),
        )
        .unwrap();
    let scatter = module
        .add_instruction(
            entry,
            NewInstruction::reduce_scatter(f32_4(), [gather], 0, sum, CollectiveAttrs::default()),
        )
        .unwrap();
    let widened = module
        .add_instruction(
            entry,
            NewInstruction::all_gather(
                Shape::array(PrimitiveType::F32, [16]),
                [scatter],
                0,
                CollectiveAttrs::default(),
            ),
        )
        .unwrap();
    module.set_root(entry, widened).unwrap();

    assert!(run(&mut module, false));
    assert!(!module.contains(gather));
    assert!(!module.contains(scatter));
    assert_eq!(module.root(entry).unwrap(), widened);
    assert_eq!(module.instruction(widened).operands, vec![x]);
}

#[test]
fn second_run_reports_no_change() {
    init_logging();

    for reducer in [BinOp::Add, BinOp::Maximum] {
        let AllReduceModule { mut module, .. } =
            all_reduce_module(8, f32_4(), reducer, CollectiveAttrs::default());

        assert!(run(&mut module, true));
        let instruction_count = module.instruction_count();
        assert!(!run(&mut module, true));
        assert_eq!(module.instruction_count(), instruction_count);
    }
}

#[test]
fn analysis_drives_default_run() {
    init_logging();

    let mut module = Module::new("test", ModuleConfig::with_replicas(8));
    let sum = module
        .add_binary_reducer("sum", BinOp::Add, PrimitiveType::F32)
        .unwrap();
    let entry = module.add_computation("entry", MAIN_THREAD);
    let shared = module
        .add_instruction(entry, NewInstruction::replicated_parameter(0, f32_4()))
        .unwrap();
    let local = module
        .add_instruction(entry, NewInstruction::parameter(1, f32_4()))
        .unwrap();
    let shared_sum = module
        .add_instruction(
            entry,
            NewInstruction::all_reduce(f32_4(), [shared], sum, CollectiveAttrs::default()),
        )
        .unwrap();
    let local_sum = module
        .add_instruction(
            entry,
            NewInstruction::all_reduce(f32_4(), [local], sum, CollectiveAttrs::default()),
        )
        .unwrap();
    let root = module
        .add_instruction(
            entry,
            NewInstruction::binary(BinOp::Add, f32_4(), shared_sum, local_sum),
        )
        .unwrap();
    module.set_root(entry, root).unwrap();

    let simplifier = AllReduceSimplifier::for_module(&module);
    assert!(simplifier.run(&mut module, &ExecutionThreads::all()).unwrap());
    verify_module(&module).unwrap();

    assert!(!module.contains(shared_sum));
    assert!(module.contains(local_sum));

    let root = module.instruction(root);
    assert_eq!(root.operands[1], local_sum);
    let product = module.instruction(root.operands[0]);
    assert_eq!(product.opcode(), Opcode::Multiply);
    assert_eq!(product.operands[0], shared);
}

#[test]
fn only_selected_threads_are_simplified() {
    init_logging();

    let mut module = Module::new("test", ModuleConfig::with_replicas(1));
    let max = module
        .add_binary_reducer("max", BinOp::Maximum, PrimitiveType::F32)
        .unwrap();

    let mut roots = Vec::new();
    for thread in [MAIN_THREAD, "host"] {
        let comp = module.add_computation(format!("{thread}_entry"), thread);
        let x = module
            .add_instruction(comp, NewInstruction::parameter(0, f32_4()))
            .unwrap();
        let all_reduce = module
            .add_instruction(
                comp,
                NewInstruction::all_reduce(f32_4(), [x], max, CollectiveAttrs::default()),
            )
            .unwrap();
        module.set_root(comp, all_reduce).unwrap();
        roots.push((comp, x, all_reduce));
    }

    let simplifier = AllReduceSimplifier::for_module(&module);
    assert!(
        simplifier
            .run(&mut module, &ExecutionThreads::only([MAIN_THREAD]))
            .unwrap()
    );

    let (main, main_x, _) = roots[0];
    let (host, _, host_all_reduce) = roots[1];
    assert_eq!(module.root(main).unwrap(), main_x);
    assert_eq!(module.root(host).unwrap(), host_all_reduce);
}

#[test]
fn random_groupings_rewrite_only_uniform_groups() {
    init_logging();

    let mut rng = SmallRng::seed_from_u64(0x5eed);

    for _ in 0..64 {
        let replica_count = rng.random_range(1..=12usize);
        let mut ids = (0..replica_count as u32).collect::<Vec<_>>();
        ids.shuffle(&mut rng);

        let mut groups = Vec::new();
        let mut rest = ids.as_slice();
        while !rest.is_empty() {
            let len = rng.random_range(1..=rest.len());
            let (group, tail) = rest.split_at(len);
            groups.push(ReplicaGroup::new(group));
            rest = tail;
        }

        let uniform = groups.iter().all(|g| g.len() == groups[0].len());
        let size_one = uniform && groups[0].len() == 1;
        let replicated = rng.random_bool(0.5);

        let AllReduceModule {
            mut module,
            entry,
            x,
            all_reduce,
        } = all_reduce_module(
            replica_count,
            f32_4(),
            BinOp::Maximum,
            CollectiveAttrs::cross_replica(groups),
        );

        let expect_rewrite = uniform && (replicated || size_one);
        assert_eq!(run(&mut module, replicated), expect_rewrite);

        let expected_root = if expect_rewrite { x } else { all_reduce };
        assert_eq!(module.root(entry).unwrap(), expected_root);
    }
}

#[test]
fn sum_of_reduce_scatter_is_kept() {
    init_logging();

    let mut module = Module::new("test", ModuleConfig::with_replicas(4));
    let sum = module
        .add_binary_reducer("sum", BinOp::Add, PrimitiveType::F32)
        .unwrap();
    let entry = module.add_computation("entry", MAIN_THREAD);
    let x = module
        .add_instruction(
            entry,
            NewInstruction::replicated_parameter(0, Shape::array(PrimitiveType::F32, [8])),
        )
        .unwrap();
    let slice_shape = Shape::array(PrimitiveType::F32, [2]);
    let scatter = module
        .add_instruction(
            entry,
            NewInstruction::reduce_scatter(
                slice_shape.clone(),
                [x],
                0,
                sum,
                CollectiveAttrs::default(),
            ),
        )
        .unwrap();
    let all_reduce = module
        .add_instruction(
            entry,
            NewInstruction::all_reduce(slice_shape, [scatter], sum, CollectiveAttrs::default()),
        )
        .unwrap();
    module.set_root(entry, all_reduce).unwrap();

    let simplifier = AllReduceSimplifier::for_module(&module);
    assert!(
        !simplifier
            .run(&mut module, &ExecutionThreads::all())
            .unwrap()
    );
    assert_eq!(module.root(entry).unwrap(), all_reduce);
    assert!(module.contains(scatter));
    assert_eq!(module.instruction(all_reduce).operands, vec![scatter]);
}

#[test]
fn analysis_failure_aborts_before_any_rewrite() {
    init_logging();

    let AllReduceModule {
        mut module,
        entry,
        all_reduce,
        ..
    } = all_reduce_module(1, f32_4(), BinOp::Maximum, CollectiveAttrs::default());

    let y = module
        .add_instruction(entry, NewInstruction::parameter(1, f32_4()))
        .unwrap();
    module
        .add_instruction(entry, NewInstruction::get_tuple_element(f32_4(), y, 0))
        .unwrap();
    let listing = module.to_string();

    let simplifier = AllReduceSimplifier::for_module(&module);
    let err = simplifier
        .run(&mut module, &ExecutionThreads::all())
        .unwrap_err();
    assert!(matches!(
        err,
        PassError::Replication(ReplicationError::BadTupleIndex { index: 0, .. })
    ));

    assert!(module.contains(all_reduce));
    assert_eq!(module.root(entry).unwrap(), all_reduce);
    assert_eq!(module.to_string(), listing);
}

#[test]
fn incompatible_replacement_is_an_error() {
    init_logging();

    let mut module = Module::new("test", ModuleConfig::with_replicas(8));
    let max = module
        .add_binary_reducer("max", BinOp::Maximum, PrimitiveType::F32)
        .unwrap();
    let entry = module.add_computation("entry", MAIN_THREAD);
    let x = module
        .add_instruction(entry, NewInstruction::parameter(0, f32_4()))
        .unwrap();
    let all_reduce = module
        .add_instruction(
            entry,
            NewInstruction::all_reduce(
                Shape::array(PrimitiveType::F32, [8]),
                [x],
                max,
                CollectiveAttrs::default(),
            ),
        )
        .unwrap();
    module.set_root(entry, all_reduce).unwrap();

    let simplifier = AllReduceSimplifier::for_module(&module);
    let err = simplifier
        .run_with_oracle(&mut module, &ExecutionThreads::all(), &FixedOracle(true))
        .unwrap_err();
    assert!(matches!(
        err,
        PassError::Ir(IrError::ShapeMismatch { old, new, .. }) if old == all_reduce && new == x
    ));
    assert!(module.contains(all_reduce));
}
