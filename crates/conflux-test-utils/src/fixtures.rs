//! Ready-made process definitions for engine tests.
//!
//! Human tasks stand in for work the test drives explicitly, so the order
//! in which branches finish stays under the test's control.

use conflux_core::{GatewayKind, ProcessDefinition};
use conflux_expression::{Expression, ReturnType};

use crate::builders::{ContainerBuilder, DefinitionBuilder};

/// `start → fork → branch_1..branch_n → join → end`, parallel gateways,
/// every branch a human task
pub fn fork_join(branches: usize) -> ProcessDefinition {
    let mut body = ContainerBuilder::new()
        .start("start")
        .gateway("fork", GatewayKind::Parallel)
        .gateway("join", GatewayKind::Parallel)
        .end("end")
        .transition("t_start", "start", "fork")
        .transition("t_end", "join", "end");

    for i in 1..=branches {
        let branch = format!("branch_{}", i);
        body = body
            .human_task(&branch)
            .transition(&format!("t_fork_{}", i), "fork", &branch)
            .transition(&format!("t_join_{}", i), &branch, "join");
    }

    DefinitionBuilder::new(&format!("fork-join-{}", branches))
        .body(body)
        .build()
}

/// `step1 → gateway1 → {step2, step3} → gateway2 → step4`
pub fn cancel_parallel_merge_gateway() -> ProcessDefinition {
    let body = ContainerBuilder::new()
        .start("start")
        .human_task("step1")
        .gateway("gateway1", GatewayKind::Parallel)
        .human_task("step2")
        .human_task("step3")
        .gateway("gateway2", GatewayKind::Parallel)
        .human_task("step4")
        .end("end")
        .transition("t0", "start", "step1")
        .transition("t1", "step1", "gateway1")
        .transition("t2", "gateway1", "step2")
        .transition("t3", "gateway1", "step3")
        .transition("t4", "step2", "gateway2")
        .transition("t5", "step3", "gateway2")
        .transition("t6", "gateway2", "step4")
        .transition("t7", "step4", "end");

    DefinitionBuilder::new("cancel-parallel-merge")
        .body(body)
        .build()
}

/// Inclusive split on `amount`: `a` when above 0, `b` when above 100, `c`
/// always; the inclusive merge waits for the activated branches only
pub fn inclusive_join() -> ProcessDefinition {
    let amount = || Expression::variable("amount", ReturnType::Long);
    let body = ContainerBuilder::new()
        .data(
            "amount",
            ReturnType::Long,
            Some(Expression::constant("5", ReturnType::Long)),
        )
        .start("start")
        .gateway("split", GatewayKind::Inclusive)
        .human_task("a")
        .human_task("b")
        .human_task("c")
        .gateway("merge", GatewayKind::Inclusive)
        .end("end")
        .transition("t0", "start", "split")
        .guarded(
            "to_a",
            "split",
            "a",
            Expression::comparison(">", amount(), Expression::constant("0", ReturnType::Long)),
        )
        .guarded(
            "to_b",
            "split",
            "b",
            Expression::comparison(">", amount(), Expression::constant("100", ReturnType::Long)),
        )
        .transition("to_c", "split", "c")
        .transition("from_a", "a", "merge")
        .transition("from_b", "b", "merge")
        .transition("from_c", "c", "merge")
        .transition("t_end", "merge", "end");

    DefinitionBuilder::new("inclusive-join").body(body).build()
}

/// Exclusive choice between `a` and `b` feeding a parallel join; the
/// branch not taken is pruned from the join
pub fn exclusive_then_parallel() -> ProcessDefinition {
    let body = ContainerBuilder::new()
        .data(
            "fast",
            ReturnType::Boolean,
            Some(Expression::constant("true", ReturnType::Boolean)),
        )
        .start("start")
        .gateway("choice", GatewayKind::Exclusive)
        .human_task("a")
        .human_task("b")
        .gateway("join", GatewayKind::Parallel)
        .end("end")
        .transition("t0", "start", "choice")
        .guarded(
            "to_a",
            "choice",
            "a",
            Expression::comparison(
                "==",
                Expression::variable("fast", ReturnType::Boolean),
                Expression::constant("true", ReturnType::Boolean),
            ),
        )
        .transition("to_b", "choice", "b")
        .default_transition("choice", "to_b")
        .transition("from_a", "a", "join")
        .transition("from_b", "b", "join")
        .transition("t_end", "join", "end");

    DefinitionBuilder::new("exclusive-then-parallel")
        .body(body)
        .build()
}

/// `start → review (sub-process: inner_start → check → inner_end) → after → end`;
/// `check` writes the process variable `checked`
pub fn sub_process_flow() -> ProcessDefinition {
    let inner = ContainerBuilder::new()
        .data(
            "attempts",
            ReturnType::Long,
            Some(Expression::constant("1", ReturnType::Long)),
        )
        .start("inner_start")
        .human_task("check")
        .end("inner_end")
        .transition("i0", "inner_start", "check")
        .transition("i1", "check", "inner_end")
        .output("check", "checked", Expression::constant("true", ReturnType::Boolean));

    let body = ContainerBuilder::new()
        .data(
            "checked",
            ReturnType::Boolean,
            Some(Expression::constant("false", ReturnType::Boolean)),
        )
        .start("start")
        .sub_process("review", inner)
        .human_task("after")
        .end("end")
        .transition("t0", "start", "review")
        .transition("t1", "review", "after")
        .transition("t2", "after", "end");

    DefinitionBuilder::new("sub-process").body(body).build()
}

/// Parallel split into a waiting human task and an automatic path ending
/// in a terminate end event
pub fn terminate_flow() -> ProcessDefinition {
    let body = ContainerBuilder::new()
        .start("start")
        .gateway("fork", GatewayKind::Parallel)
        .human_task("slow")
        .task("fast")
        .end("end")
        .terminate_end("kill")
        .transition("t0", "start", "fork")
        .transition("t_slow", "fork", "slow")
        .transition("t_fast", "fork", "fast")
        .transition("t_end", "slow", "end")
        .transition("t_kill", "fast", "kill");

    DefinitionBuilder::new("terminate").body(body).build()
}

/// Human task whose output reads a variable nobody declares, so every
/// completion attempt fails
pub fn failing_output_flow() -> ProcessDefinition {
    let body = ContainerBuilder::new()
        .start("start")
        .human_task("calc")
        .end("end")
        .transition("t0", "start", "calc")
        .transition("t1", "calc", "end")
        .output(
            "calc",
            "result",
            Expression::variable("undeclared", ReturnType::Long),
        );

    DefinitionBuilder::new("failing-output").body(body).build()
}

/// Automatic task computing `total = amount * rate` with a script, plus a
/// string index showing the total
pub fn scripted_flow() -> ProcessDefinition {
    let body = ContainerBuilder::new()
        .data(
            "amount",
            ReturnType::Long,
            Some(Expression::constant("21", ReturnType::Long)),
        )
        .data("total", ReturnType::Long, None)
        .start("start")
        .task("price")
        .human_task("approve")
        .end("end")
        .transition("t0", "start", "price")
        .transition("t1", "price", "approve")
        .transition("t2", "approve", "end")
        .output(
            "price",
            "total",
            Expression::script(
                "total",
                "amount * rate",
                ReturnType::Long,
                vec![Expression::parameter("rate", ReturnType::Long)],
            ),
        );

    DefinitionBuilder::new("scripted")
        .body(body)
        .parameter("rate", ReturnType::Long, Some(conflux_expression::Value::Long(2)))
        .string_index(
            1,
            "amount",
            Some(Expression::variable("amount", ReturnType::Long)),
        )
        .build()
}
